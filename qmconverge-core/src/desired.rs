//! Desired-state input and the declared baseline kept between passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qmconverge_hypervisor::VmSpec;

use crate::error::{LifecycleError, Result};
use crate::identity::ResourceId;
use crate::provision::ProvisioningKind;

/// One VM as an operator wants it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredVm {
    #[serde(flatten)]
    pub spec: VmSpec,
    #[serde(flatten)]
    pub flags: LifecycleFlags,
}

/// Switches that steer how a VM is brought up, as opposed to what it looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleFlags {
    /// Refuse to reuse an existing VM with the same name
    pub force_create: bool,
    /// Run the post-boot provisioner once the VM is up
    pub preprovision: bool,
    /// Name of the template VM to clone from
    #[serde(rename = "clone", skip_serializing_if = "Option::is_none")]
    pub clone_source: Option<String>,
    /// Installation image for a fresh VM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<String>,
    /// Provisioning selector (`ubuntu`, `centos`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
}

impl Default for LifecycleFlags {
    fn default() -> Self {
        Self {
            force_create: false,
            preprovision: true,
            clone_source: None,
            iso: None,
            os_type: None,
        }
    }
}

/// Where a brand new VM comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source<'a> {
    Clone(&'a str),
    Iso(&'a str),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl LifecycleFlags {
    /// The clone source or ISO image. Exactly one must be given; an empty
    /// string counts as not given.
    pub fn source(&self) -> Result<Source<'_>> {
        match (non_empty(&self.clone_source), non_empty(&self.iso)) {
            (Some(name), None) => Ok(Source::Clone(name)),
            (None, Some(iso)) => Ok(Source::Iso(iso)),
            (Some(_), Some(_)) => Err(LifecycleError::InvalidSpec(
                "only one of clone or iso may be set".to_string(),
            )),
            (None, None) => Err(LifecycleError::InvalidSpec(
                "either clone or iso must be set".to_string(),
            )),
        }
    }

    /// The provisioner to run after boot, or `None` when preprovisioning is off.
    pub fn provisioning_kind(&self) -> Result<Option<ProvisioningKind>> {
        if !self.preprovision {
            return Ok(None);
        }
        self.os_type.as_deref().unwrap_or_default().parse().map(Some)
    }
}

impl DesiredVm {
    pub fn new(spec: VmSpec) -> Self {
        Self {
            spec,
            flags: LifecycleFlags::default(),
        }
    }

    pub fn from_clone(mut self, template: impl Into<String>) -> Self {
        self.flags.clone_source = Some(template.into());
        self
    }

    pub fn from_iso(mut self, iso: impl Into<String>) -> Self {
        self.flags.iso = Some(iso.into());
        self
    }

    pub fn force_create(mut self, force: bool) -> Self {
        self.flags.force_create = force;
        self
    }

    /// Turn post-boot provisioning on with the given selector, or off with `None`.
    pub fn provision_as(mut self, os_type: Option<&str>) -> Self {
        self.flags.preprovision = os_type.is_some();
        self.flags.os_type = os_type.map(str::to_string);
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// What was last read back for a managed VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredState {
    pub resource_id: ResourceId,
    pub spec: VmSpec,
    pub updated_at: DateTime<Utc>,
}

impl DeclaredState {
    pub fn new(resource_id: ResourceId, spec: VmSpec) -> Self {
        Self {
            resource_id,
            spec,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(clone: Option<&str>, iso: Option<&str>) -> LifecycleFlags {
        LifecycleFlags {
            clone_source: clone.map(str::to_string),
            iso: iso.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_exactly_one_source() {
        assert_eq!(flags(Some("tmpl"), None).source().unwrap(), Source::Clone("tmpl"));
        assert_eq!(
            flags(Some(""), Some("debian.iso")).source().unwrap(),
            Source::Iso("debian.iso")
        );
        assert!(flags(Some("tmpl"), Some("debian.iso")).source().is_err());
        assert!(flags(None, Some("  ")).source().is_err());
    }

    #[test]
    fn test_provisioning_kind() {
        let mut f = LifecycleFlags::default();
        f.os_type = Some("ubuntu".to_string());
        assert_eq!(f.provisioning_kind().unwrap(), Some(ProvisioningKind::Ubuntu));

        f.os_type = None;
        assert!(matches!(
            f.provisioning_kind(),
            Err(LifecycleError::UnknownProvisioningKind(ref k)) if k.is_empty()
        ));

        f.preprovision = false;
        assert_eq!(f.provisioning_kind().unwrap(), None);
    }

    #[test]
    fn test_desired_vm_flattened_json() {
        let json = r#"{
            "name": "web-1",
            "target_node": "pve1",
            "memory_mib": 2048,
            "cores": 2,
            "sockets": 1,
            "clone": "ubuntu-template",
            "os_type": "ubuntu"
        }"#;
        let desired: DesiredVm = serde_json::from_str(json).unwrap();
        assert_eq!(desired.name(), "web-1");
        assert!(desired.flags.preprovision);
        assert!(!desired.flags.force_create);
        assert_eq!(desired.flags.source().unwrap(), Source::Clone("ubuntu-template"));
    }
}
