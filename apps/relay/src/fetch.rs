//! One-shot file download.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use capyrelay_client::{DownloadOutcome, RelayClient};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::cli::FetchArgs;

pub async fn run(args: FetchArgs) -> Result<()> {
    let output = output_path(&args.name, args.output.as_deref())?;

    let mut client = RelayClient::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    let mut partial = output.clone().into_os_string();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("failed to create {}", partial.display()))?;

    let result = client.download(&args.name, &mut file).await;
    file.shutdown().await?;
    drop(file);

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e).context("download failed");
        }
    };

    for text in &result.chat {
        println!("{text}");
    }

    match result.outcome {
        DownloadOutcome::Completed { bytes } => {
            tokio::fs::rename(&partial, &output)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(file = %args.name, bytes, output = %output.display(), "download complete");
            Ok(())
        }
        DownloadOutcome::Rejected { message } => {
            let _ = tokio::fs::remove_file(&partial).await;
            bail!("{message}")
        }
    }
}

/// Destination for `name`: the explicit output, or the last path component.
fn output_path(name: &str, output: Option<&Path>) -> Result<PathBuf> {
    if let Some(output) = output {
        return Ok(output.to_path_buf());
    }
    Path::new(name)
        .file_name()
        .map(PathBuf::from)
        .with_context(|| format!("cannot derive an output file name from {name:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_defaults_to_file_name() {
        assert_eq!(
            output_path("docs/readme.txt", None).unwrap(),
            PathBuf::from("readme.txt")
        );
    }

    #[test]
    fn explicit_output_wins() {
        assert_eq!(
            output_path("a.bin", Some(Path::new("/tmp/b.bin"))).unwrap(),
            PathBuf::from("/tmp/b.bin")
        );
    }

    #[test]
    fn name_without_file_component_is_rejected() {
        assert!(output_path("..", None).is_err());
    }
}
