// iptables mangle-table command builders for flow marking

use super::plan::Step;
use super::FlowMark;
use crate::backends::executor::ShellCommand;

const MANGLE_TABLE: &str = "mangle";

fn iptables<I, S>(args: I) -> ShellCommand
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ShellCommand::new("iptables").args(args)
}

/// Append a MARK rule for TCP traffic sent to the flow's host and port.
///
/// The mark is consumed by the `fw` filter on the egress root, so the rule
/// lives in OUTPUT.
pub fn mark_flow(flow: &FlowMark) -> Vec<Step> {
    let port = flow.port.to_string();
    let mark = flow.mark.to_string();

    vec![Step::required(iptables([
        "-t",
        MANGLE_TABLE,
        "-A",
        "OUTPUT",
        "-p",
        "tcp",
        "-d",
        flow.remote.as_str(),
        "--dport",
        port.as_str(),
        "-j",
        "MARK",
        "--set-mark",
        mark.as_str(),
    ]))]
}

/// Flush every rule in the mangle table
pub fn clear_marks() -> Vec<Step> {
    vec![Step::required(iptables(["-t", MANGLE_TABLE, "-F"]))]
}
