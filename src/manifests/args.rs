// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Command line flags of the Gatekeeper manager container.

/// Flags that may be given more than once. These are matched on name and
/// value, every other flag on name alone.
const MULTI_VALUED: &[&str] = &[
    "--operation",
    "--disable-opa-builtin",
    "--exempt-namespace",
    "--exempt-namespace-prefix",
    "--exempt-namespace-suffix",
    "--metrics-backend",
];

/// Split `--name=value` into its name and value. A bare flag has an empty value.
pub fn split_arg(arg: &str) -> (&str, &str) {
    arg.split_once('=').unwrap_or((arg, ""))
}

pub fn join_arg(name: &str, value: &str) -> String {
    if value.is_empty() {
        name.to_string()
    } else {
        format!("{name}={value}")
    }
}

fn find_arg(args: &[String], name: &str, value: &str) -> Option<usize> {
    let multi = MULTI_VALUED.contains(&name);
    args.iter().position(|arg| {
        let (n, v) = split_arg(arg);
        n == name && (!multi || v == value)
    })
}

/// Make sure `name` is present with `value`. A single-valued flag that is
/// already present gets its value replaced.
pub fn set_arg(args: &mut Vec<String>, name: &str, value: &str) {
    let arg = join_arg(name, value);
    match find_arg(args, name, value) {
        Some(index) => args[index] = arg,
        None => args.push(arg),
    }
}

/// Remove the first occurrence of `name` (with `value` for multi-valued flags).
pub fn unset_arg(args: &mut Vec<String>, name: &str, value: &str) {
    if let Some(index) = find_arg(args, name, value) {
        args.remove(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_arg() {
        assert_eq!(split_arg("--log-level=DEBUG"), ("--log-level", "DEBUG"));
        assert_eq!(split_arg("--disable-cert-rotation"), ("--disable-cert-rotation", ""));
        assert_eq!(split_arg("--selector=a=b"), ("--selector", "a=b"));
    }

    #[test]
    fn test_set_single_valued_replaces() {
        let mut list = args(&["--port=8443", "--log-level=INFO"]);
        set_arg(&mut list, "--log-level", "DEBUG");
        assert_eq!(list, args(&["--port=8443", "--log-level=DEBUG"]));
    }

    #[test]
    fn test_set_multi_valued_appends_new_value() {
        let mut list = args(&["--operation=webhook"]);
        set_arg(&mut list, "--operation", "mutation-webhook");
        set_arg(&mut list, "--operation", "mutation-webhook");
        assert_eq!(list, args(&["--operation=webhook", "--operation=mutation-webhook"]));
    }

    #[test]
    fn test_unset_multi_valued_matches_value() {
        let mut list = args(&["--operation=audit", "--operation=status", "--operation=mutation-status"]);
        unset_arg(&mut list, "--operation", "mutation-status");
        unset_arg(&mut list, "--operation", "not-there");
        assert_eq!(list, args(&["--operation=audit", "--operation=status"]));
    }

    #[test]
    fn test_unset_single_valued_matches_name() {
        let mut list = args(&["--log-denies=true", "--port=8443"]);
        unset_arg(&mut list, "--log-denies", "");
        assert_eq!(list, args(&["--port=8443"]));
    }
}
