//! Introspection of the camera's named attributes.
//!
//! [`bind_attributes`] turns the attribute list of an open handle into
//! bindings a presentation layer can render and edit, independent of the
//! capture session.

use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{CaptureError, ErrorKind, SdkResultExt};
use crate::sdk::{AttrFlags, AttrKind, AttrRange, AttrValue, CameraSdk, SdkHandle};

/// Everything about one attribute except its live value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttrKind,
    pub categories: Vec<String>,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<AttrRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<AttrValue>,
}

/// Getter, setter and runner for one attribute of an open handle.
///
/// A binding outlives nothing: once the handle is closed every call fails and
/// is logged.
pub struct AttributeBinding {
    sdk: Arc<dyn CameraSdk>,
    handle: SdkHandle,
    name: String,
    kind: AttrKind,
    categories: Vec<String>,
    read_only: bool,
    range: Option<AttrRange>,
}

/// An attribute is read-only when it is constant or lacks the write flag.
pub fn is_read_only(flags: AttrFlags) -> bool {
    flags.constant || !flags.write
}

/// Splits `/Controls/Exposure` into `["Controls", "Exposure"]`.
pub fn split_category(category: &str) -> Vec<String> {
    category
        .split('/')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads the attribute list of `handle` and binds every supported attribute.
///
/// Raw and unknown datatypes are skipped with a warning. Attributes whose
/// info cannot be read are logged and skipped.
pub fn bind_attributes(
    sdk: &Arc<dyn CameraSdk>,
    handle: SdkHandle,
) -> Result<Vec<AttributeBinding>, CaptureError> {
    let names = sdk
        .attr_list(handle)
        .raise(ErrorKind::Stream, "list attributes")?;

    let mut bindings = Vec::with_capacity(names.len());
    for name in names {
        let Some(info) = sdk
            .attr_info(handle, &name)
            .check(&format!("read info of attribute {}", name))
        else {
            continue;
        };

        let range = match info.kind {
            AttrKind::Uint32 | AttrKind::Float32 | AttrKind::Int64 | AttrKind::Enum => sdk
                .attr_range(handle, &name)
                .check(&format!("read range of attribute {}", name)),
            AttrKind::Command | AttrKind::String | AttrKind::Boolean => None,
            AttrKind::Raw | AttrKind::Unknown => {
                warn!("Attribute {} has unsupported datatype {:?}", name, info.kind);
                continue;
            }
        };

        bindings.push(AttributeBinding {
            sdk: Arc::clone(sdk),
            handle,
            categories: split_category(&info.category),
            read_only: is_read_only(info.flags),
            kind: info.kind,
            range,
            name,
        });
    }
    debug!("Bound {} attribute(s) of handle {}", bindings.len(), handle);
    Ok(bindings)
}

impl AttributeBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AttrKind {
        self.kind
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn range(&self) -> Option<&AttrRange> {
        self.range.as_ref()
    }

    pub fn is_command(&self) -> bool {
        self.kind == AttrKind::Command
    }

    /// Current value; `None` for commands or when the read fails.
    pub fn get(&self) -> Option<AttrValue> {
        if self.is_command() {
            return None;
        }
        self.sdk
            .attr_get(self.handle, &self.name)
            .check(&format!("get attribute {}", self.name))
    }

    pub fn set(&self, value: AttrValue) -> bool {
        if value.kind() != self.kind {
            warn!(
                "Attribute {} expects {:?}, got {:?}",
                self.name,
                self.kind,
                value.kind()
            );
            return false;
        }
        self.sdk
            .attr_set(self.handle, &self.name, value)
            .check(&format!("set attribute {}", self.name))
            .is_some()
    }

    /// Runs a command attribute.
    pub fn run(&self) -> bool {
        if !self.is_command() {
            warn!("Attribute {} is not a command", self.name);
            return false;
        }
        self.sdk
            .command_run(self.handle, &self.name)
            .check(&format!("run command {}", self.name))
            .is_some()
    }

    pub fn describe(&self) -> AttributeDescriptor {
        AttributeDescriptor {
            name: self.name.clone(),
            kind: self.kind,
            categories: self.categories.clone(),
            read_only: self.read_only,
            range: self.range.clone(),
            value: self.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::{SimulatedDevice, SimulatedSdk};

    fn open() -> (SimulatedSdk, Arc<dyn CameraSdk>, SdkHandle) {
        let sim = SimulatedSdk::new().with_device(SimulatedDevice::new(7, 64, 48));
        let sdk: Arc<dyn CameraSdk> = Arc::new(sim.clone());
        sdk.initialize().unwrap();
        let handle = sdk.open(7).unwrap();
        (sim, sdk, handle)
    }

    fn find<'a>(bindings: &'a [AttributeBinding], name: &str) -> &'a AttributeBinding {
        bindings.iter().find(|b| b.name() == name).unwrap()
    }

    #[test]
    fn test_read_only_classification() {
        assert!(is_read_only(AttrFlags::CONSTANT));
        assert!(is_read_only(AttrFlags::READ_ONLY));
        assert!(!is_read_only(AttrFlags::READ_WRITE));
        assert!(!is_read_only(AttrFlags::WRITE_ONLY));
    }

    #[test]
    fn test_split_category_drops_empty_parts() {
        assert_eq!(split_category("/Controls/Exposure/"), vec!["Controls", "Exposure"]);
        assert!(split_category("/").is_empty());
    }

    #[test]
    fn test_bindings_skip_raw_attributes() {
        let (_sim, sdk, handle) = open();
        let bindings = bind_attributes(&sdk, handle).unwrap();

        assert!(bindings.iter().all(|b| b.name() != "LensData"));
        assert!(find(&bindings, "SensorWidth").read_only());
        assert!(!find(&bindings, "Width").read_only());
        assert_eq!(
            find(&bindings, "Width").range(),
            Some(&AttrRange::Uint32 { min: 1, max: 64 })
        );
        match find(&bindings, "PixelFormat").range() {
            Some(AttrRange::Enum(values)) => assert!(values.iter().any(|v| v == "Mono12Packed")),
            other => panic!("unexpected range {:?}", other),
        }
    }

    #[test]
    fn test_binding_get_set_and_run() {
        let (sim, sdk, handle) = open();
        let bindings = bind_attributes(&sdk, handle).unwrap();

        let gain = find(&bindings, "GainValue");
        assert!(gain.set(AttrValue::Uint32(3)));
        assert_eq!(gain.get(), Some(AttrValue::Uint32(3)));
        assert!(!gain.set(AttrValue::Float32(1.0)));

        assert!(!find(&bindings, "SensorWidth").set(AttrValue::Uint32(10)));

        let start = find(&bindings, "AcquisitionStart");
        assert!(start.get().is_none());
        assert!(start.run());
        assert!(sim.is_acquiring(7));
    }

    #[test]
    fn test_descriptor_serializes() {
        let (_sim, sdk, handle) = open();
        let bindings = bind_attributes(&sdk, handle).unwrap();
        let json = serde_json::to_value(find(&bindings, "Height").describe()).unwrap();

        assert_eq!(json["name"], "Height");
        assert_eq!(json["kind"], "Uint32");
        assert_eq!(json["value"], 48);
        assert_eq!(json["read_only"], false);
    }
}
