/// Scheduled backups through the user's crontab

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::utils::CRON_MARKER;

/// Cron expression for a backup every `hours` hours
pub fn cron_expression(hours: u32) -> Result<String> {
    match hours {
        1..=23 => Ok(format!("0 */{} * * *", hours)),
        24 => Ok("0 0 * * *".to_string()),
        _ => Err(anyhow!("Backup interval must be between 1 and 24 hours, got {}", hours)),
    }
}

/// Crontab line running `command` on `schedule`, tagged with our marker
pub fn cron_line(schedule: &str, command: &str) -> String {
    format!("{} {} {}", schedule, command, CRON_MARKER)
}

/// Command cron runs for a scheduled backup. `overrides` become
/// `KEY=value` assignments in front of it, since cron starts with a bare environment.
pub fn backup_command(exe: &Path, config: Option<&Path>, overrides: &[(&str, String)]) -> String {
    let mut words: Vec<String> = overrides
        .iter()
        .map(|(key, value)| format!("{}={}", key, shell_quote(value)))
        .collect();
    words.push(shell_quote(&exe.display().to_string()));
    if let Some(path) = config {
        words.push("--config".to_string());
        words.push(shell_quote(&path.display().to_string()));
    }
    words.push("backup".to_string());
    words.push("--send".to_string());
    words.join(" ")
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:+,@".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// Replace (or add) our line in `crontab`
pub fn install_entry(crontab: &str, line: &str) -> String {
    let mut out = remove_entry(crontab);
    out.push_str(line);
    out.push('\n');
    out
}

/// Drop every line carrying our marker
pub fn remove_entry(crontab: &str) -> String {
    let mut out: String = crontab
        .lines()
        .filter(|l| !l.contains(CRON_MARKER))
        .collect::<Vec<_>>()
        .join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Our current line, if installed
pub fn find_entry(crontab: &str) -> Option<&str> {
    crontab.lines().find(|l| l.contains(CRON_MARKER))
}

/// Read the current user's crontab. No crontab yet reads as empty.
pub async fn read_crontab() -> Result<String> {
    let output = Command::new("crontab")
        .arg("-l")
        .output()
        .await
        .context("Failed to run crontab. Is cron installed?")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Ok(String::new())
    }
}

/// Replace the current user's crontab
pub async fn write_crontab(content: &str) -> Result<()> {
    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to run crontab")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(content.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(anyhow!(
            "crontab rejected the new schedule: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_expression() {
        assert_eq!(cron_expression(1).unwrap(), "0 */1 * * *");
        assert_eq!(cron_expression(6).unwrap(), "0 */6 * * *");
        assert_eq!(cron_expression(24).unwrap(), "0 0 * * *");
        assert!(cron_expression(0).is_err());
        assert!(cron_expression(25).is_err());
    }

    #[test]
    fn test_install_replaces_existing_entry() {
        let existing = "MAILTO=root\n0 */2 * * * /usr/local/bin/panelctl backup --send # panelctl-backup\n@reboot /opt/other\n";
        let line = cron_line("0 */6 * * *", "/usr/local/bin/panelctl backup --send");

        let updated = install_entry(existing, &line);
        assert_eq!(
            updated,
            "MAILTO=root\n@reboot /opt/other\n0 */6 * * * /usr/local/bin/panelctl backup --send # panelctl-backup\n"
        );
        assert_eq!(find_entry(&updated), Some(line.as_str()));
    }

    #[test]
    fn test_install_into_empty_crontab() {
        let updated = install_entry("", "0 0 * * * x # panelctl-backup");
        assert_eq!(updated, "0 0 * * * x # panelctl-backup\n");
    }

    #[test]
    fn test_remove_entry() {
        let crontab = "0 0 * * * x # panelctl-backup\n";
        assert_eq!(remove_entry(crontab), "");
        assert_eq!(find_entry(""), None);
    }

    #[test]
    fn test_backup_command_carries_overrides() {
        let command = backup_command(
            Path::new("/usr/local/bin/panelctl"),
            Some(Path::new("/root/my config.toml")),
            &[
                ("PANELCTL_APP_DIR", "/srv/panel".to_string()),
                ("PANELCTL_NODE_APP_DIR", "/srv/it's node".to_string()),
            ],
        );
        assert_eq!(
            command,
            "PANELCTL_APP_DIR=/srv/panel PANELCTL_NODE_APP_DIR='/srv/it'\\''s node' \
             /usr/local/bin/panelctl --config '/root/my config.toml' backup --send"
        );
    }

    #[test]
    fn test_backup_command_without_overrides() {
        let command = backup_command(Path::new("/usr/local/bin/panelctl"), None, &[]);
        assert_eq!(command, "/usr/local/bin/panelctl backup --send");
    }

}
