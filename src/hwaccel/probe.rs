//! Device-node based backend probing

use std::fs;
use std::path::{Path, PathBuf};

use super::{BackendProber, HwBackend, HwDevice};
use crate::error::{Error, Result};

const INTEL_PCI_VENDOR: &str = "0x8086";

/// Probes backends by looking for their device nodes.
///
/// Roots are configurable so the probe can run against a fake tree.
#[derive(Debug, Clone)]
pub struct DeviceNodeProber {
    dev_root: PathBuf,
    sys_root: PathBuf,
}

impl Default for DeviceNodeProber {
    fn default() -> Self {
        Self::with_roots("/dev", "/sys")
    }
}

impl DeviceNodeProber {
    pub fn with_roots(dev_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            sys_root: sys_root.into(),
        }
    }

    fn node(&self, name: &str) -> Option<PathBuf> {
        let path = self.dev_root.join(name);
        path.exists().then_some(path)
    }

    /// `/dev/dri/renderD*` nodes, sorted
    fn render_nodes(&self) -> Vec<PathBuf> {
        let mut nodes: Vec<PathBuf> = fs::read_dir(self.dev_root.join("dri"))
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("renderD"))
            })
            .collect();
        nodes.sort();
        nodes
    }

    fn pci_vendor(&self, render_node: &Path) -> Option<String> {
        let name = render_node.file_name()?;
        let vendor = self
            .sys_root
            .join("class/drm")
            .join(name)
            .join("device/vendor");
        fs::read_to_string(vendor).ok().map(|s| s.trim().to_lowercase())
    }

    fn find_m2m_device(&self) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.dev_root)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().find(|p| self.is_m2m(p))
    }

    #[cfg(feature = "v4l2")]
    fn is_m2m(&self, path: &Path) -> bool {
        use v4l::capability::Flags;

        if let Ok(device) = v4l::Device::with_path(path) {
            if let Ok(caps) = device.query_caps() {
                return caps.capabilities.contains(Flags::VIDEO_M2M)
                    || caps.capabilities.contains(Flags::VIDEO_M2M_MPLANE);
            }
        }
        self.m2m_by_name(path)
    }

    #[cfg(not(feature = "v4l2"))]
    fn is_m2m(&self, path: &Path) -> bool {
        self.m2m_by_name(path)
    }

    /// Fallback on the sysfs driver name for nodes that cannot be queried
    fn m2m_by_name(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let sys_name = self
            .sys_root
            .join("class/video4linux")
            .join(name)
            .join("name");
        fs::read_to_string(sys_name)
            .map(|n| {
                let n = n.to_lowercase();
                n.contains("codec") || n.contains("m2m") || n.contains("vpu")
            })
            .unwrap_or(false)
    }
}

impl BackendProber for DeviceNodeProber {
    fn try_init(&self, backend: HwBackend) -> Result<HwDevice> {
        let device_path = match backend {
            HwBackend::Cuda => self
                .node("nvidia0")
                .filter(|_| self.node("nvidiactl").is_some()),
            HwBackend::Qsv => self
                .render_nodes()
                .into_iter()
                .find(|n| self.pci_vendor(n).as_deref() == Some(INTEL_PCI_VENDOR)),
            HwBackend::Vaapi => self.render_nodes().into_iter().next(),
            HwBackend::Rkmpp => self.node("mpp_service"),
            HwBackend::V4l2m2m => self.find_m2m_device(),
        };

        device_path
            .map(|device_path| HwDevice {
                backend,
                device_path,
            })
            .ok_or_else(|| Error::HardwareUnavailable(format!("no {} device node", backend)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccelerationPreference;
    use crate::hwaccel::HardwareContext;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_empty_tree_has_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let prober = DeviceNodeProber::with_roots(dir.path().join("dev"), dir.path().join("sys"));
        for backend in HwBackend::PRIORITY {
            assert!(prober.try_init(backend).is_err());
        }
        let ctx = HardwareContext::probe_with(AccelerationPreference::Auto, &prober);
        assert!(!ctx.is_available());
    }

    #[test]
    fn test_cuda_needs_control_node() {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("dev");
        touch(&dev.join("nvidia0"));
        let prober = DeviceNodeProber::with_roots(&dev, dir.path().join("sys"));
        assert!(prober.try_init(HwBackend::Cuda).is_err());

        touch(&dev.join("nvidiactl"));
        let device = prober.try_init(HwBackend::Cuda).unwrap();
        assert_eq!(device.device_path, dev.join("nvidia0"));
    }

    #[test]
    fn test_render_node_vendor_selects_qsv() {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("dev");
        let sys = dir.path().join("sys");
        touch(&dev.join("dri/renderD128"));
        touch(&dev.join("dri/card0"));
        let prober = DeviceNodeProber::with_roots(&dev, &sys);

        // AMD GPU: VAAPI only
        fs::create_dir_all(sys.join("class/drm/renderD128/device")).unwrap();
        fs::write(sys.join("class/drm/renderD128/device/vendor"), "0x1002\n").unwrap();
        assert!(prober.try_init(HwBackend::Qsv).is_err());
        assert_eq!(
            prober.try_init(HwBackend::Vaapi).unwrap().device_path,
            dev.join("dri/renderD128")
        );

        fs::write(sys.join("class/drm/renderD128/device/vendor"), "0x8086\n").unwrap();
        let ctx = HardwareContext::probe_with(AccelerationPreference::Auto, &prober);
        assert_eq!(ctx.backend(), Some(HwBackend::Qsv));
    }

    #[test]
    fn test_rkmpp_node() {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("dev");
        touch(&dev.join("mpp_service"));
        let prober = DeviceNodeProber::with_roots(&dev, dir.path().join("sys"));
        assert_eq!(prober.try_init(HwBackend::Rkmpp).unwrap().backend, HwBackend::Rkmpp);
    }
}
