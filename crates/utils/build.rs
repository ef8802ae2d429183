use vergen_git2::Emitter;
use vergen_git2::Git2Builder;

const IMAGE_VERSION_VAR: &str = "VERSION";

fn main() {
    // Builds from a source tarball have no repository to describe
    if let Err(err) = emit_commit() {
        println!("cargo:warning=vergen: {err}");
    }

    println!("cargo:rerun-if-env-changed={IMAGE_VERSION_VAR}");
    let image_version = std::env::var(IMAGE_VERSION_VAR)
        .ok()
        .filter(|version| !version.is_empty())
        .unwrap_or_else(|| "latest".to_string());
    println!("cargo:rustc-env=IMAGE_VERSION={image_version}");
}

/// Emits `VERGEN_GIT_SHA` and `VERGEN_GIT_DIRTY`, the only git facts the
/// version string uses.
fn emit_commit() -> anyhow::Result<()> {
    let git = Git2Builder::default().sha(true).dirty(true).build()?;
    Emitter::default()
        .fail_on_error()
        .add_instructions(&git)?
        .emit()
}
