//! Translation of allocation requests into device grants and container environment

use std::collections::HashMap;
use std::collections::HashSet;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;

use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::ContainerAllocateResponse;
use super::api::DeviceSpec;
use crate::device::AllocationPathResolver;
use crate::device::DeviceSnapshot;
use crate::error::PluginError;
use crate::error::PluginResult;

/// Comma separated driver indices of the allocated devices.
pub const ENV_VISIBLE_DEVICES: &str = "HABANA_VISIBLE_DEVICES";
/// Comma separated primary device files.
pub const ENV_VISIBLE_DEVICE_PATHS: &str = "HL_VISIBLE_DEVICES";
/// Comma separated device ids (serial numbers).
pub const ENV_VISIBLE_DEVICE_IDS: &str = "HL_VISIBLE_DEVICES_UUID";
/// Comma separated module indices, only set for partial allocations.
pub const ENV_VISIBLE_MODULES: &str = "HABANA_VISIBLE_MODULES";

pub const DEVICE_PERMISSIONS: &str = "rw";

/// Builds one container response per container request.
///
/// Every requested id is checked against `snapshot` before the resolver is
/// consulted, so a request naming an unknown device fails without partial work.
pub fn allocate(
    snapshot: &DeviceSnapshot,
    resolver: &(impl AllocationPathResolver + ?Sized),
    request: &AllocateRequest,
) -> PluginResult<AllocateResponse> {
    if let Some(id) = request
        .container_requests
        .iter()
        .flat_map(|container| container.devices_ids.iter())
        .find(|id| !snapshot.contains(id))
    {
        return Err(Report::new(PluginError::UnknownDevice { id: id.clone() }));
    }

    let container_responses = request
        .container_requests
        .iter()
        .map(|container| allocate_container(snapshot.len(), resolver, &container.devices_ids))
        .collect::<PluginResult<Vec<_>>>()?;

    Ok(AllocateResponse {
        container_responses,
    })
}

fn allocate_container(
    advertised: usize,
    resolver: &(impl AllocationPathResolver + ?Sized),
    device_ids: &[String],
) -> PluginResult<ContainerAllocateResponse> {
    if device_ids.is_empty() {
        debug!("Container requested no devices");
        return Ok(ContainerAllocateResponse::default());
    }

    let mut seen = HashSet::new();
    let device_ids: Vec<&str> = device_ids
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();

    let mut devices = Vec::new();
    let mut primary_paths = Vec::with_capacity(device_ids.len());
    let mut indices = Vec::with_capacity(device_ids.len());
    let mut modules = Vec::with_capacity(device_ids.len());

    for &id in &device_ids {
        let allocation = resolver
            .resolve(id)
            .change_context_lazy(|| PluginError::Resolve { id: id.to_string() })?;
        debug!(device = %id, paths = ?allocation.host_paths, "Resolved device files");

        if let Some(primary) = allocation.host_paths.first() {
            primary_paths.push(primary.clone());
        }
        devices.extend(allocation.host_paths.iter().map(|path| DeviceSpec {
            container_path: path.clone(),
            host_path: path.clone(),
            permissions: DEVICE_PERMISSIONS.to_string(),
        }));
        indices.push(allocation.device_index);
        modules.push(allocation.module_index);
    }

    let mut envs = HashMap::new();
    envs.insert(ENV_VISIBLE_DEVICE_PATHS.to_string(), primary_paths.join(","));
    envs.insert(ENV_VISIBLE_DEVICE_IDS.to_string(), device_ids.join(","));
    if let Some(indices) = join_known(&indices) {
        envs.insert(ENV_VISIBLE_DEVICES.to_string(), indices);
    }
    // A full allocation sees every module, so the runtime default applies
    if device_ids.len() < advertised {
        if let Some(modules) = join_known(&modules) {
            envs.insert(ENV_VISIBLE_MODULES.to_string(), modules);
        }
    }

    info!(
        devices = ?device_ids,
        envs = ?envs,
        "Allocated devices to container"
    );

    Ok(ContainerAllocateResponse {
        envs,
        mounts: Vec::new(),
        devices,
        annotations: HashMap::new(),
        cdi_devices: Vec::new(),
    })
}

/// Comma joins the values if every one of them is known.
fn join_known(values: &[Option<u32>]) -> Option<String> {
    values
        .iter()
        .map(|value| value.map(|v| v.to_string()))
        .collect::<Option<Vec<_>>>()
        .map(|values| values.join(","))
}
