//! Drives a running orchestrator from the terminal.
//!
//! Events are rendered as they arrive. Group selection and retry prompts run
//! on the blocking pool so the orchestrator keeps being polled.

use bundlepatch::patch::{
    DownloadProgress, GroupInfo, PatchEvent, PatchHandle, PatchMessage, PatchState,
};
use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::CliError;

/// How the session answers the orchestrator's questions.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Group to download when groups are offered.
    pub group: Option<String>,
    /// Take the first offered group and never prompt.
    pub assume_yes: bool,
}

/// Consume `events` until the pipeline finishes or parks for good.
///
/// Subscribe before sending the first command so no event is missed.
pub async fn drive(
    handle: &PatchHandle,
    mut events: broadcast::Receiver<PatchMessage>,
    options: &SessionOptions,
) -> Result<(), CliError> {
    let mut bar = DownloadBar::default();

    install_cancel_handler(handle)?;

    loop {
        let message = match events.recv().await {
            Ok(message) => message,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event receiver lagged");
                continue;
            }
            Err(RecvError::Closed) => {
                return Err(CliError::Failed("orchestrator stopped".to_string()))
            }
        };
        if message.instance != handle.instance() {
            continue;
        }

        match message.event {
            PatchEvent::StateEntered(state) => {
                debug!(state = state.name(), "State entered");
                if state == PatchState::ClearCache {
                    bar.finish();
                    println!("{}", style("Cleaning cache...").dim());
                }
            }
            PatchEvent::CreateDownloader { groups } => {
                let group = choose_group(groups, options).await?;
                println!(
                    "Downloading {} ({} files, {})",
                    style(&group.group_name).cyan().bold(),
                    group.total_count,
                    HumanBytes(group.total_bytes)
                );
                handle.begin_download(group)?;
            }
            PatchEvent::DownloadProgress(progress) => bar.update(&progress),
            PatchEvent::DownloadFailed { file_name, error } => {
                bar.println(format!(
                    "{} {}: {}",
                    style("failed").red(),
                    file_name,
                    error
                ));
            }
            PatchEvent::DownloadCanceled => {
                bar.abandon();
                return Err(CliError::Canceled);
            }
            PatchEvent::GoToAppStore { local, remote } => {
                bar.abandon();
                return Err(CliError::AppOutdated { local, remote });
            }
            PatchEvent::RepairFailed { package, reason } => {
                // Stops arriving once the repair budget is spent.
                warn!(package = %package, reason = %reason, "Repair failed, retrying");
                println!(
                    "{} clearing {}: {}",
                    style("Retrying").yellow(),
                    package,
                    reason
                );
                handle.retry_repair()?;
            }
            PatchEvent::Done => {
                bar.finish();
                println!("{}", style("Up to date.").green().bold());
                return Ok(());
            }
            event if event.is_failure() => {
                bar.abandon();
                let description = describe_failure(&event);
                eprintln!("{} {}", style("Error:").red().bold(), description);
                if options.assume_yes || !confirm_retry().await? {
                    return Err(CliError::Failed(description));
                }
                retry(handle, &event)?;
            }
            _ => {}
        }
    }
}

/// Cancel the run on Ctrl-C.
fn install_cancel_handler(handle: &PatchHandle) -> Result<(), CliError> {
    let handle = handle.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Received interrupt, canceling...");
        if let Err(e) = handle.cancel() {
            debug!(error = %e, "Cancel after orchestrator stopped");
        }
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))
}

/// Re-enter the state that published `event`.
fn retry(handle: &PatchHandle, event: &PatchEvent) -> Result<(), CliError> {
    match event {
        PatchEvent::AppVersionUpdateFailed { .. } => handle.retry_app_version()?,
        PatchEvent::InitPatchModeFailed { .. } => handle.retry_init()?,
        PatchEvent::VersionUpdateFailed { .. } => handle.retry_version_update()?,
        PatchEvent::ManifestUpdateFailed { .. } => handle.retry_manifest_update()?,
        PatchEvent::CreateDownloaderFailed { .. }
        | PatchEvent::DownloaderFailed { .. }
        | PatchEvent::DiskNotEnoughSpace { .. } => handle.retry_create_downloader()?,
        _ => {}
    }
    Ok(())
}

fn describe_failure(event: &PatchEvent) -> String {
    match event {
        PatchEvent::AppVersionUpdateFailed { reason } => {
            format!("could not read the remote app config: {}", reason)
        }
        PatchEvent::InitPatchModeFailed { package, reason } => {
            format!("package '{}' failed to initialize: {}", package, reason)
        }
        PatchEvent::VersionUpdateFailed { package, reason } => {
            format!("could not fetch the version of '{}': {}", package, reason)
        }
        PatchEvent::ManifestUpdateFailed { package, reason } => {
            format!("could not update the manifest of '{}': {}", package, reason)
        }
        PatchEvent::CreateDownloaderFailed { reason } => {
            format!("could not plan downloads: {}", reason)
        }
        PatchEvent::DownloaderFailed { package } => {
            format!("downloads for '{}' failed", package)
        }
        PatchEvent::DiskNotEnoughSpace {
            available_mb,
            required_bytes,
        } => format!(
            "not enough disk space: {} needed, {} MB available",
            HumanBytes(*required_bytes),
            available_mb
        ),
        other => other.name().to_string(),
    }
}

async fn confirm_retry() -> Result<bool, CliError> {
    tokio::task::spawn_blocking(|| {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Retry?")
            .default(true)
            .interact()
            .map_err(|e| CliError::Prompt(e.to_string()))
    })
    .await
    .map_err(|e| CliError::Prompt(e.to_string()))?
}

/// Pick the group to download: `--group`, the first with `--yes` or a
/// single offer, otherwise ask.
async fn choose_group(
    groups: Vec<GroupInfo>,
    options: &SessionOptions,
) -> Result<GroupInfo, CliError> {
    if let Some(name) = &options.group {
        return find_group(&groups, name);
    }

    print_groups(&groups);
    if options.assume_yes || groups.len() == 1 {
        return groups
            .into_iter()
            .next()
            .ok_or_else(|| CliError::Failed("no download groups offered".to_string()));
    }

    let items: Vec<String> = groups.iter().map(describe_group).collect();
    let index = tokio::task::spawn_blocking(move || {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select a download group")
            .items(&items)
            .default(0)
            .interact()
            .map_err(|e| CliError::Prompt(e.to_string()))
    })
    .await
    .map_err(|e| CliError::Prompt(e.to_string()))??;

    groups
        .into_iter()
        .nth(index)
        .ok_or_else(|| CliError::Prompt(format!("selection {} out of range", index)))
}

fn find_group(groups: &[GroupInfo], name: &str) -> Result<GroupInfo, CliError> {
    groups
        .iter()
        .find(|g| g.group_name == name)
        .cloned()
        .ok_or_else(|| {
            let offered: Vec<&str> = groups.iter().map(|g| g.group_name.as_str()).collect();
            CliError::Config(format!(
                "Group '{}' is not offered. Available: {}",
                name,
                offered.join(", ")
            ))
        })
}

fn print_groups(groups: &[GroupInfo]) {
    println!("{}", style("Updates available:").bold());
    for group in groups {
        println!(
            "  {} {}",
            style(&group.group_name).cyan(),
            style(format!(
                "{} files, {}",
                group.total_count,
                HumanBytes(group.total_bytes)
            ))
            .dim()
        );
    }
    println!();
}

fn describe_group(group: &GroupInfo) -> String {
    format!(
        "{} ({} files, {})",
        group.group_name,
        group.total_count,
        HumanBytes(group.total_bytes)
    )
}

/// Byte progress bar, created on the first progress event.
#[derive(Default)]
struct DownloadBar {
    bar: Option<ProgressBar>,
}

impl DownloadBar {
    fn update(&mut self, progress: &DownloadProgress) {
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(progress.total_bytes);
            let style = ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} | {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-");
            bar.set_style(style);
            bar
        });
        bar.set_length(progress.total_bytes);
        bar.set_position(progress.current_bytes);
        bar.set_message(format!(
            "{}/{} files, {}/s",
            progress.current_count,
            progress.total_count,
            HumanBytes(progress.speed_bytes_per_sec)
        ));
    }

    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message("complete");
        }
    }

    fn abandon(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, count: usize, bytes: u64) -> GroupInfo {
        GroupInfo {
            group_name: name.to_string(),
            tags: vec![name.to_string()],
            total_count: count,
            total_bytes: bytes,
        }
    }

    #[test]
    fn test_find_group_by_name() {
        let groups = vec![group("base", 3, 100), group("hd", 5, 4096)];
        assert_eq!(find_group(&groups, "hd").unwrap().total_count, 5);

        let err = find_group(&groups, "uhd").unwrap_err();
        assert!(err.to_string().contains("base, hd"));
    }

    #[tokio::test]
    async fn test_choose_group_without_prompt() {
        let groups = vec![group("base", 3, 100), group("hd", 5, 4096)];
        let options = SessionOptions {
            group: None,
            assume_yes: true,
        };
        let chosen = choose_group(groups.clone(), &options).await.unwrap();
        assert_eq!(chosen.group_name, "base");

        let options = SessionOptions {
            group: Some("hd".to_string()),
            assume_yes: false,
        };
        let chosen = choose_group(groups, &options).await.unwrap();
        assert_eq!(chosen.group_name, "hd");
    }

    #[test]
    fn test_describe_disk_failure() {
        let text = describe_failure(&PatchEvent::DiskNotEnoughSpace {
            available_mb: 12,
            required_bytes: 2048,
        });
        assert!(text.contains("12 MB"));
        assert!(text.contains("2.00 KiB"));
    }
}
