//! PDF → Markdown conversion gateway.
//!
//! The converter itself is an external program; this module wraps it with a
//! per-storage-key cache. Output is written to a temporary sibling and
//! renamed into place, so a crashed conversion never leaves a partial cache
//! entry. A blake3 fingerprint of the source PDF sits next to each cache
//! entry; a PDF whose bytes changed is re-converted even when skipping
//! existing output.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

/// External PDF→Markdown converter.
#[async_trait]
pub trait PdfConverter: Send + Sync {
    /// Convert `pdf_path`, writing Markdown to `output_md_path`.
    ///
    /// Must never mutate the source PDF.
    async fn convert(&self, pdf_path: &Path, output_md_path: &Path) -> Result<()>;
}

/// Runs a configured external command.
///
/// The command template is split on whitespace; `{pdf}`, `{out_dir}` and
/// `{stem}` placeholders are substituted per invocation.
pub struct CommandConverter {
    template: String,
}

impl CommandConverter {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    fn build_args(&self, pdf_path: &Path, output_md_path: &Path) -> Result<Vec<String>> {
        let out_dir = output_md_path
            .parent()
            .context("output path has no parent directory")?;
        let stem = output_md_path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("output path has no stem")?;

        let args: Vec<String> = self
            .template
            .split_whitespace()
            .map(|part| {
                part.replace("{pdf}", &pdf_path.to_string_lossy())
                    .replace("{out_dir}", &out_dir.to_string_lossy())
                    .replace("{stem}", stem)
            })
            .collect();

        if args.is_empty() {
            bail!("converter command is empty");
        }
        Ok(args)
    }
}

#[async_trait]
impl PdfConverter for CommandConverter {
    async fn convert(&self, pdf_path: &Path, output_md_path: &Path) -> Result<()> {
        let args = self.build_args(pdf_path, output_md_path)?;
        tracing::debug!(command = ?args, "Running converter");

        let status = tokio::process::Command::new(&args[0])
            .args(&args[1..])
            .status()
            .await
            .with_context(|| format!("Failed to spawn converter {}", args[0]))?;

        if !status.success() {
            bail!("converter exited with {status}");
        }
        if !output_md_path.exists() {
            bail!(
                "converter reported success but produced no output at {}",
                output_md_path.display()
            );
        }
        Ok(())
    }
}

/// Test converter that writes canned Markdown, or fails on demand.
pub struct FixtureConverter {
    markdown: String,
    fail: bool,
}

impl FixtureConverter {
    pub fn new(markdown: &str) -> Self {
        Self {
            markdown: markdown.to_string(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            markdown: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl PdfConverter for FixtureConverter {
    async fn convert(&self, _pdf_path: &Path, output_md_path: &Path) -> Result<()> {
        if self.fail {
            bail!("fixture converter configured to fail");
        }
        tokio::fs::write(output_md_path, &self.markdown).await?;
        Ok(())
    }
}

/// Outcome of a gateway conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converted {
    /// The converter ran and produced fresh output
    Fresh,
    /// The cached Markdown was reused
    Cached,
}

/// Caching wrapper around a [`PdfConverter`].
pub struct ConverterGateway {
    converter: Box<dyn PdfConverter>,
    skip_existing: bool,
}

impl ConverterGateway {
    pub fn new(converter: Box<dyn PdfConverter>, skip_existing: bool) -> Self {
        Self {
            converter,
            skip_existing,
        }
    }

    /// Convert `pdf_path` into `output_md_path`, reusing the cache entry
    /// when allowed and the source fingerprint still matches.
    pub async fn convert(&self, pdf_path: &Path, output_md_path: &Path) -> Result<Converted> {
        if let Some(parent) = output_md_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let fingerprint = fingerprint_file(pdf_path)
            .with_context(|| format!("Failed to read PDF {}", pdf_path.display()))?;

        if self.skip_existing
            && output_md_path.exists()
            && stored_fingerprint(output_md_path).as_deref() == Some(fingerprint.as_str())
        {
            tracing::debug!(markdown = %output_md_path.display(), "Reusing cached markdown");
            return Ok(Converted::Cached);
        }

        // Convert into a temporary sibling, then rename into place.
        let staging = staging_path(output_md_path);
        let result = self.converter.convert(pdf_path, &staging).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        tokio::fs::rename(&staging, output_md_path)
            .await
            .with_context(|| format!("Failed to move output into {}", output_md_path.display()))?;
        store_fingerprint(output_md_path, &fingerprint)?;

        tracing::info!(
            pdf = %pdf_path.display(),
            markdown = %output_md_path.display(),
            "Converted PDF to markdown"
        );
        Ok(Converted::Fresh)
    }
}

fn staging_path(output_md_path: &Path) -> PathBuf {
    let mut name = output_md_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.md".to_string());
    name.push_str(".partial");
    output_md_path.with_file_name(name)
}

fn sidecar_path(output_md_path: &Path) -> PathBuf {
    let mut name = output_md_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.md".to_string());
    name.push_str(".src.b3");
    output_md_path.with_file_name(name)
}

fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn stored_fingerprint(output_md_path: &Path) -> Option<String> {
    std::fs::read_to_string(sidecar_path(output_md_path))
        .ok()
        .map(|s| s.trim().to_string())
}

fn store_fingerprint(output_md_path: &Path, fingerprint: &str) -> Result<()> {
    std::fs::write(sidecar_path(output_md_path), fingerprint)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn converts_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 fake").unwrap();

        let out = dir.path().join("md").join("STOR1").join("paper.md");
        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("# Title\nbody\n")), true);

        let outcome = gateway.convert(&pdf, &out).await.unwrap();
        assert_eq!(outcome, Converted::Fresh);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "# Title\nbody\n");
    }

    #[tokio::test]
    async fn skip_existing_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 fake").unwrap();
        let out = dir.path().join("paper.md");

        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("v1")), true);
        assert_eq!(gateway.convert(&pdf, &out).await.unwrap(), Converted::Fresh);

        // Second gateway would write different content, but the cache wins
        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("v2")), true);
        assert_eq!(gateway.convert(&pdf, &out).await.unwrap(), Converted::Cached);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "v1");
    }

    #[tokio::test]
    async fn changed_pdf_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::write(&pdf, b"first bytes").unwrap();
        let out = dir.path().join("paper.md");

        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("v1")), true);
        gateway.convert(&pdf, &out).await.unwrap();

        std::fs::write(&pdf, b"second bytes").unwrap();
        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("v2")), true);
        assert_eq!(gateway.convert(&pdf, &out).await.unwrap(), Converted::Fresh);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "v2");
    }

    #[tokio::test]
    async fn skip_existing_false_always_reconverts() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        let out = dir.path().join("paper.md");

        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("v1")), false);
        gateway.convert(&pdf, &out).await.unwrap();
        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("v2")), false);
        assert_eq!(gateway.convert(&pdf, &out).await.unwrap(), Converted::Fresh);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "v2");
    }

    #[tokio::test]
    async fn failed_conversion_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        let out = dir.path().join("paper.md");

        let gateway = ConverterGateway::new(Box::new(FixtureConverter::failing()), true);
        assert!(gateway.convert(&pdf, &out).await.is_err());
        assert!(!out.exists());
        assert!(!staging_path(&out).exists());
    }

    #[tokio::test]
    async fn missing_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = ConverterGateway::new(Box::new(FixtureConverter::new("x")), true);
        let result = gateway
            .convert(&dir.path().join("absent.pdf"), &dir.path().join("out.md"))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn command_template_substitution() {
        let converter = CommandConverter::new("marker_single {pdf} --output_dir {out_dir} --stem {stem}");
        let args = converter
            .build_args(Path::new("/lib/storage/K1/paper.pdf"), Path::new("/md/K1/paper.md"))
            .unwrap();
        assert_eq!(
            args,
            vec![
                "marker_single".to_string(),
                "/lib/storage/K1/paper.pdf".to_string(),
                "--output_dir".to_string(),
                "/md/K1".to_string(),
                "--stem".to_string(),
                "paper".to_string(),
            ]
        );
    }
}
