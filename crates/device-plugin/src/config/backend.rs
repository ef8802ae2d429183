use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use clap::ValueEnum;
use error_stack::Report;
use error_stack::ResultExt;
use hlml::Hlml;
use tracing::info;

use crate::device::hlml::HlmlDevices;
use crate::device::DeviceBackend;
use crate::device::DeviceError;
use crate::device::DeviceType;
use crate::device::MockDevices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Devices discovered through the vendor management library
    Hlml,
    /// In-memory devices, for trying the plugin without accelerators
    Mock,
}

/// Selection of the device backend, shared by every subcommand.
#[derive(Args, Clone, Debug)]
pub struct BackendArgs {
    #[arg(
        long,
        env = "HABANA_DEV_TYPE",
        value_enum,
        default_value = "goya",
        help = "Accelerator family to advertise"
    )]
    pub dev_type: DeviceType,

    #[arg(
        long,
        value_enum,
        default_value = "hlml",
        help = "Device backend, 'hlml' on real nodes or 'mock' for dry runs"
    )]
    pub backend: BackendKind,

    #[arg(
        long,
        env = "HLML_LIB_PATH",
        default_value = hlml::DEFAULT_LIBRARY,
        value_hint = clap::ValueHint::FilePath,
        help = "Path or name of the HLML shared library"
    )]
    pub hlml_lib_path: PathBuf,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "mock-0,mock-1",
        help = "Comma separated device ids served by the mock backend"
    )]
    pub mock_devices: Vec<String>,
}

impl BackendArgs {
    /// Builds the configured backend. The HLML library stays initialized for
    /// as long as the backend is alive.
    pub fn build(&self) -> Result<Arc<dyn DeviceBackend>, Report<DeviceError>> {
        match self.backend {
            BackendKind::Hlml => {
                let hlml = Hlml::init(&self.hlml_lib_path)
                    .change_context(DeviceError::Init)
                    .attach_printable_lazy(|| {
                        format!("loading {}", self.hlml_lib_path.display())
                    })?;
                info!("HLML initialized from {}", self.hlml_lib_path.display());
                Ok(Arc::new(HlmlDevices::new(hlml, self.dev_type)))
            }
            BackendKind::Mock => {
                let ids: Vec<&str> = self.mock_devices.iter().map(String::as_str).collect();
                info!("Using mock backend with devices {:?}", ids);
                Ok(Arc::new(MockDevices::with_ids(&ids)))
            }
        }
    }
}
