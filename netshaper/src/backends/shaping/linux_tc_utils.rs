// tc / ip command builders for Linux traffic control
//
// Every function here is pure: parameters in, steps out. Which steps may fail
// harmlessly is decided here, next to the command itself.

use super::params::{DelayMs, Percent, RateKbit};
use super::plan::Step;
use crate::backends::executor::ShellCommand;

/// Handle of every root qdisc we install
pub const ROOT_HANDLE: &str = "1:";
/// HTB parent class carrying the interface-wide limit
pub const HTB_PARENT_CLASS: &str = "1:1";
/// HTB leaf class that unclassified traffic falls into
pub const HTB_DEFAULT_CLASS: &str = "1:30";
/// Parent id of the ingress qdisc
pub const INGRESS_PARENT: &str = "ffff:";
/// Lowest-priority band of the prio qdisc, used for marked traffic
pub const MARK_BAND: &str = "1:3";

/// Network emulation effect for a root netem qdisc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Netem {
    Loss(Percent),
    Delay(DelayMs),
}

impl Netem {
    fn args(self) -> [String; 2] {
        match self {
            Netem::Loss(p) => ["loss".to_string(), p.to_string()],
            Netem::Delay(ms) => ["delay".to_string(), ms.to_string()],
        }
    }
}

fn tc<I, S>(args: I) -> ShellCommand
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ShellCommand::new("tc").args(args)
}

fn ip<I, S>(args: I) -> ShellCommand
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ShellCommand::new("ip").args(args)
}

/// Remove the root qdisc; fails when none is installed, which is fine
pub fn clear_root(interface: &str) -> Vec<Step> {
    vec![Step::best_effort(tc(["qdisc", "del", "dev", interface, "root"]))]
}

/// Remove the ingress qdisc (and with it the redirect filter)
fn clear_ingress(interface: &str) -> Vec<Step> {
    vec![Step::best_effort(tc(["qdisc", "del", "dev", interface, "ingress"]))]
}

/// HTB root with a limited parent class and a default child class at the
/// same rate. Parent class before child: the kernel rejects an orphan class.
///
/// Expects the root to be clear already; see [`clear_root`].
pub fn install_bandwidth_limit(interface: &str, rate: RateKbit) -> Vec<Step> {
    let rate = rate.to_string();
    let default_minor = HTB_DEFAULT_CLASS.trim_start_matches(ROOT_HANDLE);

    vec![
        Step::required(tc([
            "qdisc", "add", "dev", interface, "root", "handle", ROOT_HANDLE, "htb", "default",
            default_minor,
        ])),
        Step::required(tc([
            "class",
            "add",
            "dev",
            interface,
            "parent",
            ROOT_HANDLE,
            "classid",
            HTB_PARENT_CLASS,
            "htb",
            "rate",
            rate.as_str(),
        ])),
        Step::required(tc([
            "class",
            "add",
            "dev",
            interface,
            "parent",
            HTB_PARENT_CLASS,
            "classid",
            HTB_DEFAULT_CLASS,
            "htb",
            "rate",
            rate.as_str(),
        ])),
    ]
}

/// Atomically swap whatever root qdisc is present for a netem qdisc
pub fn replace_root_netem(device: &str, effect: Netem) -> Vec<Step> {
    let [kind, value] = effect.args();
    vec![Step::required(tc([
        "qdisc", "replace", "dev", device, "root", "netem", kind.as_str(), value.as_str(),
    ]))]
}

/// Load the ifb module, create the device if missing and bring it up.
///
/// modprobe fails when ifb is built in or already loaded, and `ip link add`
/// fails when the device exists; neither is an error here. Bringing the
/// device up is the step that proves it is usable.
pub fn ensure_redirect_device(device: &str) -> Vec<Step> {
    vec![
        Step::best_effort(ShellCommand::new("modprobe").arg("ifb")),
        Step::best_effort(ip(["link", "add", device, "type", "ifb"])),
        Step::required(ip(["link", "set", "dev", device, "up"])),
    ]
}

/// Fresh ingress qdisc on the interface, a catch-all filter redirecting
/// every inbound IPv4 packet to the redirect device's egress, and a netem
/// loss qdisc on that device
pub fn install_ingress_redirect(interface: &str, device: &str, loss: Percent) -> Vec<Step> {
    let mut steps = clear_ingress(interface);
    steps.push(Step::required(tc(["qdisc", "add", "dev", interface, "ingress"])));
    steps.push(Step::required(tc([
        "filter",
        "add",
        "dev",
        interface,
        "parent",
        INGRESS_PARENT,
        "protocol",
        "ip",
        "u32",
        "match",
        "u32",
        "0",
        "0",
        "action",
        "mirred",
        "egress",
        "redirect",
        "dev",
        device,
    ])));
    steps.extend(replace_root_netem(device, Netem::Loss(loss)));
    steps
}

/// Bring the redirect device down and delete it; both may find it absent
fn remove_redirect_device(device: &str) -> Vec<Step> {
    vec![
        Step::best_effort(ip(["link", "set", "dev", device, "down"])),
        Step::best_effort(ip(["link", "delete", device])),
    ]
}

/// prio root whose lowest band carries netem loss, plus an fw filter steering
/// packets with `mark` into that band
pub fn install_mark_filter(interface: &str, mark: u32, loss: Percent) -> Vec<Step> {
    let loss = loss.to_string();
    let mark = mark.to_string();

    let mut steps = clear_root(interface);
    steps.push(Step::required(tc([
        "qdisc", "add", "dev", interface, "root", "handle", ROOT_HANDLE, "prio",
    ])));
    steps.push(Step::required(tc([
        "qdisc", "add", "dev", interface, "parent", MARK_BAND, "netem", "loss", loss.as_str(),
    ])));
    steps.push(Step::required(tc([
        "filter", "add", "dev", interface, "protocol", "ip", "parent", "1:0", "prio", "1",
        "handle", mark.as_str(), "fw", "flowid", MARK_BAND,
    ])));
    steps
}

/// Undo [`install_ingress_redirect`] and [`ensure_redirect_device`]
pub fn remove_ingress_redirect(interface: &str, device: &str) -> Vec<Step> {
    let mut steps = clear_ingress(interface);
    steps.extend(remove_redirect_device(device));
    steps
}
