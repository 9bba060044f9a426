//! External-tool conversions.
//!
//! Each target maps to one fixed command line. Tools are trusted to name
//! their outputs by convention; outputs are then found by a sorted glob.

pub mod command;
pub mod target;
pub mod tools;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::info_span;

use crate::config::ToolsConfig;
use crate::error::ConversionError;

pub use command::run_tool;
pub use target::{ConversionOptions, ConversionTarget};
pub use tools::{check_tools, ToolInfo};

/// Files produced by one conversion, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutput {
    pub files: Vec<PathBuf>,
    /// Stem for the archive if `files` has to be zipped.
    pub archive_stem: &'static str,
}

#[derive(Debug, Clone)]
pub struct Converter {
    tools: ToolsConfig,
}

impl Converter {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    /// Runs `target` over `inputs`, writing into `out_dir`.
    ///
    /// The input count and option shape are re-checked here even though
    /// submission already validated them.
    pub fn run(
        &self,
        target: ConversionTarget,
        options: &ConversionOptions,
        inputs: &[PathBuf],
        out_dir: &Path,
    ) -> Result<ConversionOutput, ConversionError> {
        target.check_input_count(inputs.len())?;
        let _span = info_span!("convert", conversion = %target, inputs = inputs.len()).entered();

        let files = match target {
            ConversionTarget::Mp4ToMp3 => self.mp4_to_mp3(&inputs[0], options, out_dir)?,
            ConversionTarget::PdfToJpg => self.pdf_to_jpg(&inputs[0], options, out_dir)?,
            ConversionTarget::JpgToPdf => self.jpg_to_pdf(inputs, options, out_dir)?,
            ConversionTarget::DocxToPdf => self.docx_to_pdf(&inputs[0], out_dir)?,
        };

        Ok(ConversionOutput {
            files,
            archive_stem: target.archive_stem(),
        })
    }

    fn mp4_to_mp3(
        &self,
        src: &Path,
        options: &ConversionOptions,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let out = out_dir.join("output.mp3");
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            src.into(),
            "-vn".into(),
            "-ab".into(),
            options.bitrate().into(),
            out.clone().into(),
        ];
        run_tool(&self.tools.ffmpeg, &args)?;
        expect_file(out, &self.tools.ffmpeg)
    }

    fn pdf_to_jpg(
        &self,
        src: &Path,
        options: &ConversionOptions,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let images = out_dir.join("images");
        ensure_dir(&images)?;

        let dpi = options.dpi(target::PDF_TO_JPG_DEFAULT_DPI);
        let args: Vec<OsString> = vec![
            "-jpeg".into(),
            "-r".into(),
            dpi.to_string().into(),
            src.into(),
            images.join("page").into(),
        ];
        run_tool(&self.tools.pdftoppm, &args)?;

        let mut pages = Vec::new();
        for pattern in ["page-*.jpg", "page*.jpg", "*.jpg"] {
            pages = discover(&images, pattern)?;
            if !pages.is_empty() {
                break;
            }
        }
        sort_by_page_number(&mut pages);

        non_empty(pages, &self.tools.pdftoppm)
    }

    fn jpg_to_pdf(
        &self,
        inputs: &[PathBuf],
        options: &ConversionOptions,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let out = out_dir.join("output.pdf");
        let dpi = options.dpi(target::JPG_TO_PDF_DEFAULT_DPI);

        let mut args: Vec<OsString> = inputs.iter().map(OsString::from).collect();
        args.extend([
            "-units".into(),
            "PixelsPerInch".into(),
            "-density".into(),
            dpi.to_string().into(),
            out.clone().into(),
        ]);
        run_tool(&self.tools.magick, &args)?;
        expect_file(out, &self.tools.magick)
    }

    fn docx_to_pdf(&self, src: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ConversionError> {
        let docs = out_dir.join("docs");
        ensure_dir(&docs)?;

        let args: Vec<OsString> = vec![
            "--headless".into(),
            "--convert-to".into(),
            "pdf".into(),
            "--outdir".into(),
            docs.clone().into(),
            src.into(),
        ];
        run_tool(&self.tools.soffice, &args)?;

        non_empty(discover(&docs, "*.pdf")?, &self.tools.soffice)
    }
}

fn ensure_dir(path: &Path) -> Result<(), ConversionError> {
    std::fs::create_dir_all(path).map_err(|e| ConversionError::OutputDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

fn expect_file(path: PathBuf, program: &str) -> Result<Vec<PathBuf>, ConversionError> {
    if path.is_file() {
        Ok(vec![path])
    } else {
        Err(ConversionError::NoArtifact {
            program: program.to_string(),
        })
    }
}

fn non_empty(files: Vec<PathBuf>, program: &str) -> Result<Vec<PathBuf>, ConversionError> {
    if files.is_empty() {
        return Err(ConversionError::NoArtifact {
            program: program.to_string(),
        });
    }
    Ok(files)
}

/// Regular files in `dir` matching `pattern`, sorted by name.
fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ConversionError> {
    let dir_str = dir.to_str().ok_or_else(|| {
        ConversionError::Discovery(format!("non UTF-8 output directory {}", dir.display()))
    })?;
    let full = format!("{}/{}", glob::Pattern::escape(dir_str), pattern);

    let mut files = Vec::new();
    for entry in glob::glob(&full).map_err(|e| ConversionError::Discovery(e.to_string()))? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => log::warn!("Skipping unreadable output: {}", e),
        }
    }
    files.sort();
    Ok(files)
}

/// `page-2.jpg` before `page-10.jpg`; unnumbered names go last, by name.
fn sort_by_page_number(pages: &mut [PathBuf]) {
    pages.sort_by_key(|path| {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let digits: String = stem
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        (digits.parse::<u64>().unwrap_or(u64::MAX), path.clone())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sort_by_page_number() {
        let mut pages: Vec<PathBuf> = ["page-10.jpg", "page-2.jpg", "page-01.jpg", "cover.jpg"]
            .iter()
            .map(PathBuf::from)
            .collect();
        sort_by_page_number(&mut pages);
        let names: Vec<_> = pages.iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(names, vec!["page-01.jpg", "page-2.jpg", "page-10.jpg", "cover.jpg"]);
    }

    #[test]
    fn test_discover_is_sorted_and_skips_directories() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b.pdf"), b"").unwrap();
        std::fs::write(temp_dir.path().join("a.pdf"), b"").unwrap();
        std::fs::create_dir(temp_dir.path().join("c.pdf")).unwrap();

        let found = discover(temp_dir.path(), "*.pdf").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_wrong_input_count_is_rejected_before_running() {
        let temp_dir = TempDir::new().unwrap();
        let converter = Converter::new(ToolsConfig::default());
        let result = converter.run(
            ConversionTarget::PdfToJpg,
            &ConversionOptions::defaults(ConversionTarget::PdfToJpg),
            &[],
            temp_dir.path(),
        );
        assert!(matches!(result, Err(ConversionError::Validation(_))));
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_tool(dir: &Path, name: &str, script: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn tools_in(dir: &Path) -> ToolsConfig {
            ToolsConfig {
                // Output path is the last argument
                ffmpeg: fake_tool(dir, "ffmpeg", r#"for a; do out="$a"; done; printf 'ID3' > "$out""#),
                // $5 is the output prefix
                pdftoppm: fake_tool(
                    dir,
                    "pdftoppm",
                    r#"for n in 1 2 10; do printf "p$n" > "$5-$n.jpg"; done"#,
                ),
                magick: fake_tool(
                    dir,
                    "magick",
                    r#"for a; do out="$a"; done; echo "$@" > "$out""#,
                ),
                soffice: fake_tool(dir, "soffice", r#"printf '%%PDF' > "$5/report.pdf""#),
            }
        }

        #[test]
        fn test_mp4_to_mp3_produces_single_file() {
            let temp_dir = TempDir::new().unwrap();
            let converter = Converter::new(tools_in(temp_dir.path()));
            let src = temp_dir.path().join("input_clip.mp4");
            std::fs::write(&src, b"mp4").unwrap();

            let output = converter
                .run(
                    ConversionTarget::Mp4ToMp3,
                    &ConversionOptions::defaults(ConversionTarget::Mp4ToMp3),
                    &[src],
                    temp_dir.path(),
                )
                .unwrap();

            assert_eq!(output.files, vec![temp_dir.path().join("output.mp3")]);
        }

        #[test]
        fn test_pdf_to_jpg_orders_pages_numerically() {
            let temp_dir = TempDir::new().unwrap();
            let converter = Converter::new(tools_in(temp_dir.path()));
            let src = temp_dir.path().join("input_doc.pdf");
            std::fs::write(&src, b"%PDF").unwrap();

            let output = converter
                .run(
                    ConversionTarget::PdfToJpg,
                    &ConversionOptions::Raster { dpi: 150 },
                    &[src],
                    temp_dir.path(),
                )
                .unwrap();

            let names: Vec<_> = output
                .files
                .iter()
                .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
                .collect();
            assert_eq!(names, vec!["page-1.jpg", "page-2.jpg", "page-10.jpg"]);
            assert_eq!(output.archive_stem, "pages");
        }

        #[test]
        fn test_jpg_to_pdf_passes_inputs_in_order() {
            let temp_dir = TempDir::new().unwrap();
            let converter = Converter::new(tools_in(temp_dir.path()));
            let inputs: Vec<PathBuf> = ["001_b.jpg", "002_a.jpg"]
                .iter()
                .map(|n| temp_dir.path().join(n))
                .collect();

            let output = converter
                .run(
                    ConversionTarget::JpgToPdf,
                    &ConversionOptions::Raster { dpi: 300 },
                    &inputs,
                    temp_dir.path(),
                )
                .unwrap();

            let argv = std::fs::read_to_string(&output.files[0]).unwrap();
            let first = argv.find("001_b.jpg").unwrap();
            let second = argv.find("002_a.jpg").unwrap();
            assert!(first < second);
            assert!(argv.contains("-units PixelsPerInch -density 300"));
        }

        #[test]
        fn test_docx_to_pdf_discovers_output() {
            let temp_dir = TempDir::new().unwrap();
            let converter = Converter::new(tools_in(temp_dir.path()));
            let src = temp_dir.path().join("input_report.docx");
            std::fs::write(&src, b"PK").unwrap();

            let output = converter
                .run(
                    ConversionTarget::DocxToPdf,
                    &ConversionOptions::Document,
                    &[src],
                    temp_dir.path(),
                )
                .unwrap();

            assert_eq!(output.files, vec![temp_dir.path().join("docs/report.pdf")]);
            assert_eq!(output.archive_stem, "docs");
        }

        #[test]
        fn test_successful_exit_without_output_is_no_artifact() {
            let temp_dir = TempDir::new().unwrap();
            let mut tools = tools_in(temp_dir.path());
            tools.soffice = fake_tool(temp_dir.path(), "soffice-silent", "exit 0");
            let converter = Converter::new(tools);
            let src = temp_dir.path().join("input_report.docx");
            std::fs::write(&src, b"PK").unwrap();

            let result = converter.run(
                ConversionTarget::DocxToPdf,
                &ConversionOptions::Document,
                &[src],
                temp_dir.path(),
            );

            assert!(matches!(result, Err(ConversionError::NoArtifact { .. })));
        }
    }
}
