use std::{io, process::Stdio};

use tokio::{io::AsyncWriteExt, process::Command};
use tracing::warn;

const QRENCODE: &str = "qrencode";

/// Prints `text` as a terminal QR code. A missing or failing `qrencode` is
/// only a warning.
pub async fn print(text: &str) {
    match render(QRENCODE, text).await {
        Ok(qr) => print!("{qr}"),
        Err(e) => warn!("can't render QR code: {e}"),
    }
}

async fn render(program: &str, text: &str) -> io::Result<String> {
    let mut child = Command::new(program)
        .args(["-t", "ansiutf8"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program() {
        let err = render("/nonexistent/qrencode", "[Interface]\n")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn failing_program() {
        assert!(render("false", "[Interface]\n").await.is_err());
    }
}
