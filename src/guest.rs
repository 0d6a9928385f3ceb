//! Commands and files placed inside a guest
//!
//! Everything here is pure string rendering. The pipeline decides when to
//! run the results; nothing in this module touches the hypervisor.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::models::FrameworkSpec;

/// `PATH` seen by the service; covers venvs and rustup installs
pub const SERVICE_PATH: &str = "/opt/app/venv/bin:/root/.cargo/bin:/usr/local/bin:/usr/bin:/bin";

/// Knobs for [`render_unit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOptions {
    pub working_dir: String,
    pub restart_sec: u32,
    pub path: String,
}

impl Default for UnitOptions {
    fn default() -> Self {
        Self {
            working_dir: "/opt/app".to_string(),
            restart_sec: 10,
            path: SERVICE_PATH.to_string(),
        }
    }
}

/// Render the systemd unit that supervises the application.
///
/// The run command is wrapped in `/bin/bash -c "..."` and escaped for systemd's
/// own quoting and specifier expansion, so it reaches bash unchanged.
pub fn render_unit(framework: &FrameworkSpec, app_name: &str, options: &UnitOptions) -> String {
    format!(
        "[Unit]\n\
         Description={name} Application ({display})\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User=root\n\
         WorkingDirectory={dir}\n\
         Environment=\"PATH={path}\"\n\
         ExecStart=/bin/bash -c \"{run}\"\n\
         Restart=always\n\
         RestartSec={restart}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        name = escape_specifiers(app_name),
        display = escape_specifiers(&framework.display_name),
        dir = options.working_dir,
        path = options.path,
        run = escape_exec_arg(&framework.run_command),
        restart = options.restart_sec,
    )
}

fn escape_specifiers(s: &str) -> String {
    s.replace('%', "%%")
}

/// Escape for a double-quoted systemd `ExecStart` word
fn escape_exec_arg(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '%' => out.push_str("%%"),
            '$' => out.push_str("$$"),
            '\n' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

/// Single-quote for POSIX shells
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Clone `repo` into `app_dir`
pub fn fetch_command(repo: &str, app_dir: &str) -> String {
    let parent = match app_dir.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    };
    format!(
        "mkdir -p {} && git clone -- {} {} 2>&1",
        shell_quote(parent),
        shell_quote(repo),
        shell_quote(app_dir)
    )
}

pub fn unit_path(app_name: &str) -> String {
    format!("/etc/systemd/system/{}.service", app_name)
}

/// Write `unit` to the unit path without any shell interpretation of its body
pub fn install_unit_command(app_name: &str, unit: &str) -> String {
    format!(
        "printf '%s' '{}' | base64 -d > {}",
        STANDARD.encode(unit),
        shell_quote(&unit_path(app_name))
    )
}

/// Reload the supervisor, then enable and start the unit
pub fn register_command(app_name: &str) -> String {
    let unit = shell_quote(app_name);
    format!(
        "systemctl daemon-reload && systemctl enable {unit} && systemctl start {unit}"
    )
}

pub fn logs_command(app_name: &str, lines: u32) -> String {
    format!(
        "journalctl -u {} -n {} --no-pager 2>&1",
        shell_quote(app_name),
        lines
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flask() -> FrameworkSpec {
        FrameworkSpec::new("python-flask", "Python Flask", 8000)
            .with_run("/opt/app/venv/bin/gunicorn --bind 0.0.0.0:8000 app:app")
    }

    #[test]
    fn test_render_unit() {
        let unit = render_unit(&flask(), "demo", &UnitOptions::default());
        assert!(unit.starts_with("[Unit]\nDescription=demo Application (Python Flask)\n"));
        assert!(unit.contains("WorkingDirectory=/opt/app\n"));
        assert!(unit.contains(
            "ExecStart=/bin/bash -c \"/opt/app/venv/bin/gunicorn --bind 0.0.0.0:8000 app:app\"\n"
        ));
        assert!(unit.contains("Restart=always\nRestartSec=10\n"));
        assert!(unit.ends_with("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn test_render_unit_escapes_run_command() {
        let spec = FrameworkSpec::new("x", "100% X", 80)
            .with_run(r#". $HOME/.cargo/env && echo "hi" \ ok"#);
        let unit = render_unit(&spec, "x", &UnitOptions::default());
        assert!(unit.contains("Description=x Application (100%% X)"));
        assert!(unit.contains(r#"ExecStart=/bin/bash -c ". $$HOME/.cargo/env && echo \"hi\" \\ ok""#));
    }

    #[test]
    fn test_render_unit_is_deterministic() {
        let opts = UnitOptions {
            restart_sec: 3,
            ..Default::default()
        };
        assert_eq!(render_unit(&flask(), "a", &opts), render_unit(&flask(), "a", &opts));
        assert!(render_unit(&flask(), "a", &opts).contains("RestartSec=3"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_fetch_command() {
        assert_eq!(
            fetch_command("https://example.com/r.git", "/opt/app"),
            "mkdir -p '/opt' && git clone -- 'https://example.com/r.git' '/opt/app' 2>&1"
        );
        assert!(fetch_command("x", "/app").starts_with("mkdir -p '/' "));
    }

    #[test]
    fn test_install_unit_round_trips_body() {
        let unit = render_unit(&flask(), "demo", &UnitOptions::default());
        let cmd = install_unit_command("demo", &unit);
        assert!(cmd.ends_with("| base64 -d > '/etc/systemd/system/demo.service'"));

        let encoded = cmd.split('\'').nth(3).unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), unit.as_bytes());
    }

    #[test]
    fn test_register_and_logs_commands() {
        assert_eq!(
            register_command("demo"),
            "systemctl daemon-reload && systemctl enable 'demo' && systemctl start 'demo'"
        );
        assert_eq!(logs_command("demo", 50), "journalctl -u 'demo' -n 50 --no-pager 2>&1");
    }
}
