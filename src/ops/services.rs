//! Process group naming for restarts. Group names must match the ones in
//! the generated supervisor and systemd configs.

/// Supervisor group(s) to restart, picked from `supervisorctl status` output.
///
/// Prefers `<bench>-workers: <bench>-web:`, then the older
/// `<bench>-processes:` layout, then the legacy `frappe:` group.
pub fn supervisor_groups(bench_name: &str, status: &str) -> Vec<String> {
    let web = format!("{}-web:", bench_name);
    let workers = format!("{}-workers:", bench_name);
    let processes = format!("{}-processes:", bench_name);

    if status.contains(&workers) {
        vec![workers, web]
    } else if status.contains(&processes) {
        vec![processes]
    } else {
        vec!["frappe:".to_string()]
    }
}

/// `<bench>.target`
pub fn systemd_target(bench_name: &str) -> String {
    format!("{}.target", bench_name)
}

/// Units listed in `systemctl show -p Requires <target>` output.
pub fn required_units(show_output: &str) -> Vec<String> {
    show_output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Requires="))
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_V12: &str = "\
frappe-bench-redis:frappe-bench-redis-cache     RUNNING   pid 101, uptime 1:00:00
frappe-bench-web:frappe-bench-frappe-web        RUNNING   pid 102, uptime 1:00:00
frappe-bench-workers:frappe-bench-frappe-worker RUNNING   pid 103, uptime 1:00:00
";

    #[test]
    fn workers_and_web() {
        assert_eq!(
            supervisor_groups("frappe-bench", STATUS_V12),
            ["frappe-bench-workers:", "frappe-bench-web:"]
        );
    }

    #[test]
    fn processes_layout() {
        let status = "frappe-bench-processes:frappe-bench-frappe-web RUNNING\n";
        assert_eq!(
            supervisor_groups("frappe-bench", status),
            ["frappe-bench-processes:"]
        );
    }

    #[test]
    fn legacy_fallback() {
        assert_eq!(supervisor_groups("frappe-bench", ""), ["frappe:"]);
        // another bench's groups do not count
        assert_eq!(supervisor_groups("other", STATUS_V12), ["frappe:"]);
    }

    #[test]
    fn systemd_names() {
        assert_eq!(systemd_target("frappe-bench"), "frappe-bench.target");
        assert_eq!(
            required_units("Requires=frappe-bench-web.target frappe-bench-workers.target\n"),
            ["frappe-bench-web.target", "frappe-bench-workers.target"]
        );
        assert!(required_units("Requires=\n").is_empty());
    }
}
