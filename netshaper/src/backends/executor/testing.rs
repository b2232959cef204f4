// In-memory stand-in for the kernel's tc/ip/iptables state, used by tests.
//
// Only the command shapes this crate issues are modelled. Failure text mirrors
// what iproute2 prints for the same situation.

use super::{CommandExecutor, ExecError, ShellCommand};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const ERR_NO_ROOT: &str = "Error: Cannot delete qdisc with handle of zero.";
const ERR_EXCLUSIVE: &str = "Error: Exclusivity flag on, cannot modify.";
const ERR_NO_CLASS: &str = "Error: Specified class not found.";
const ERR_NO_PARENT: &str = "Error: Parent Qdisc doesn't exists.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub root: Option<String>,
    pub classes: BTreeMap<String, String>,
    pub children: Vec<String>,
    pub filters: Vec<String>,
    pub ingress: bool,
    pub ingress_filters: Vec<String>,
    pub up: bool,
}

#[derive(Debug, Default)]
struct KernelModel {
    devices: BTreeMap<String, DeviceState>,
    mangle: Vec<String>,
    log: Vec<String>,
    failures: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct FakeKernel {
    model: Arc<Mutex<KernelModel>>,
    yield_between: bool,
}

impl FakeKernel {
    pub fn new(interface: &str) -> Self {
        let mut model = KernelModel::default();
        model.devices.insert(
            interface.to_string(),
            DeviceState {
                up: true,
                ..DeviceState::default()
            },
        );
        Self {
            model: Arc::new(Mutex::new(model)),
            yield_between: false,
        }
    }

    /// Yield to the scheduler before each command so concurrent callers get a
    /// chance to interleave
    pub fn yielding(mut self) -> Self {
        self.yield_between = true;
        self
    }

    /// Fail every command whose rendered line contains `pattern`
    pub fn fail_on(&self, pattern: &str, diagnostic: &str) {
        self.model
            .lock()
            .unwrap()
            .failures
            .push((pattern.to_string(), diagnostic.to_string()));
    }

    pub fn log(&self) -> Vec<String> {
        self.model.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.model.lock().unwrap().log.clear();
    }

    pub fn device(&self, name: &str) -> Option<DeviceState> {
        self.model.lock().unwrap().devices.get(name).cloned()
    }

    pub fn has_device(&self, name: &str) -> bool {
        self.model.lock().unwrap().devices.contains_key(name)
    }

    pub fn mangle(&self) -> Vec<String> {
        self.model.lock().unwrap().mangle.clone()
    }
}

impl KernelModel {
    fn dev_mut(&mut self, name: &str) -> Result<&mut DeviceState, String> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| format!("Cannot find device \"{}\"", name))
    }

    fn tc(&mut self, args: &[&str]) -> Result<(), String> {
        match args {
            ["qdisc", "del", "dev", dev, "root"] => {
                let d = self.dev_mut(dev)?;
                if d.root.take().is_none() {
                    return Err(ERR_NO_ROOT.to_string());
                }
                d.classes.clear();
                d.children.clear();
                d.filters.clear();
                Ok(())
            }
            ["qdisc", "del", "dev", dev, "ingress"] => {
                let d = self.dev_mut(dev)?;
                if !d.ingress {
                    return Err("Error: Invalid handle.".to_string());
                }
                d.ingress = false;
                d.ingress_filters.clear();
                Ok(())
            }
            ["qdisc", "add", "dev", dev, "ingress"] => {
                let d = self.dev_mut(dev)?;
                if d.ingress {
                    return Err(ERR_EXCLUSIVE.to_string());
                }
                d.ingress = true;
                Ok(())
            }
            ["qdisc", "add", "dev", dev, "root", "handle", "1:", rest @ ..] => {
                let d = self.dev_mut(dev)?;
                if d.root.is_some() {
                    return Err(ERR_EXCLUSIVE.to_string());
                }
                d.root = Some(rest.join(" "));
                Ok(())
            }
            ["qdisc", "replace", "dev", dev, "root", rest @ ..] => {
                let d = self.dev_mut(dev)?;
                d.root = Some(rest.join(" "));
                d.classes.clear();
                d.children.clear();
                d.filters.clear();
                Ok(())
            }
            ["qdisc", "add", "dev", dev, "parent", parent, rest @ ..] => {
                let d = self.dev_mut(dev)?;
                if !d.root.as_deref().is_some_and(|r| r.starts_with("prio")) {
                    return Err(ERR_NO_CLASS.to_string());
                }
                d.children.push(format!("{} {}", parent, rest.join(" ")));
                Ok(())
            }
            ["class", "add", "dev", dev, "parent", parent, "classid", classid, "htb", "rate", rate] => {
                let d = self.dev_mut(dev)?;
                let parent_exists = match *parent {
                    "1:" => d.root.as_deref().is_some_and(|r| r.starts_with("htb")),
                    other => d.classes.contains_key(other),
                };
                if !parent_exists {
                    return Err(ERR_NO_CLASS.to_string());
                }
                if d.classes.contains_key(*classid) {
                    return Err(ERR_EXCLUSIVE.to_string());
                }
                d.classes.insert(classid.to_string(), rate.to_string());
                Ok(())
            }
            ["filter", "add", "dev", dev, "parent", "ffff:", rest @ ..] => {
                if let Some(pos) = rest.iter().position(|a| *a == "dev") {
                    let target = rest.get(pos + 1).copied().unwrap_or_default();
                    if !self.devices.contains_key(target) {
                        return Err(format!("Cannot find device \"{}\"", target));
                    }
                }
                let d = self.dev_mut(dev)?;
                if !d.ingress {
                    return Err(ERR_NO_PARENT.to_string());
                }
                d.ingress_filters.push(rest.join(" "));
                Ok(())
            }
            ["filter", "add", "dev", dev, rest @ ..] => {
                let d = self.dev_mut(dev)?;
                if d.root.is_none() {
                    return Err(ERR_NO_PARENT.to_string());
                }
                d.filters.push(rest.join(" "));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn ip(&mut self, args: &[&str]) -> Result<(), String> {
        match args {
            ["link", "add", name, "type", "ifb"] => {
                if self.devices.contains_key(*name) {
                    return Err("RTNETLINK answers: File exists".to_string());
                }
                self.devices.insert(name.to_string(), DeviceState::default());
                Ok(())
            }
            ["link", "set", "dev", name, state] => {
                self.dev_mut(name)?.up = *state == "up";
                Ok(())
            }
            ["link", "delete", name] => self
                .devices
                .remove(*name)
                .map(|_| ())
                .ok_or_else(|| format!("Cannot find device \"{}\"", name)),
            _ => Ok(()),
        }
    }

    fn iptables(&mut self, args: &[&str]) -> Result<(), String> {
        match args {
            ["-t", "mangle", "-A", rest @ ..] => {
                self.mangle.push(rest.join(" "));
                Ok(())
            }
            ["-t", "mangle", "-F"] => {
                self.mangle.clear();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CommandExecutor for FakeKernel {
    fn name(&self) -> &'static str {
        "fake_kernel"
    }

    async fn execute(&self, command: &ShellCommand) -> Result<String, ExecError> {
        if self.yield_between {
            tokio::task::yield_now().await;
        }

        let line = command.to_string();
        let mut model = self.model.lock().unwrap();
        model.log.push(line.clone());

        let injected = model
            .failures
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, diagnostic)| diagnostic.clone());

        let args: Vec<&str> = command.get_args().iter().map(String::as_str).collect();
        let result = match injected {
            Some(diagnostic) => Err(diagnostic),
            None => match command.program() {
                "tc" => model.tc(&args),
                "ip" => model.ip(&args),
                "iptables" => model.iptables(&args),
                _ => Ok(()),
            },
        };

        result
            .map(|()| String::new())
            .map_err(|diagnostic| ExecError::NonZero {
                command: line,
                status: "exit status: 2".to_string(),
                diagnostic,
            })
    }
}
