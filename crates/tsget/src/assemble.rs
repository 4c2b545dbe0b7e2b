// Final assembly: concatenate retrieved segments, in manifest order, into
// one output stream. HLS media segments are designed to concatenate into a
// playable transport stream, so this is pure byte concatenation.

use std::ffi::OsStr;
use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::SEGMENT_SUFFIX;
use crate::error::DownloadError;

/// Concatenate every `*.ts` file in `segment_dir` into `output_path`,
/// in lexicographic name order (= manifest order, thanks to zero-padded
/// index naming). Returns the number of bytes written.
pub async fn assemble(segment_dir: &Path, output_path: &Path) -> Result<u64, DownloadError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(segment_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if Path::new(&name).extension() == Some(OsStr::new(SEGMENT_SUFFIX)) {
            names.push(name);
        }
    }
    if names.is_empty() {
        return Err(DownloadError::NoSegments {
            dir: segment_dir.display().to_string(),
        });
    }
    // Listing order is filesystem-dependent; the name sort is what
    // guarantees manifest order.
    names.sort();

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut output = tokio::fs::File::create(output_path).await?;
    let mut total: u64 = 0;
    for name in &names {
        let mut segment = tokio::fs::File::open(segment_dir.join(name)).await?;
        total += tokio::io::copy(&mut segment, &mut output).await?;
    }
    output.flush().await?;

    info!(
        segments = names.len(),
        bytes = total,
        output = %output_path.display(),
        "assembled output"
    );
    Ok(total)
}
