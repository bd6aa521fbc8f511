//! Multi-format extraction through the `relay` binary in dry-run mode, which
//! needs no remote service: PDF, word-processor, plain text, and unsupported
//! files inside one archive.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Single-page PDF showing `phrase` in Helvetica, with a computed stream
/// length and xref offsets.
fn minimal_pdf_with_text(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn zip_archive(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, data) in entries {
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(&data).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn setup_archive(entries: Vec<(&str, Vec<u8>)>) -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("upload.zip");
    std::fs::write(&archive, zip_archive(entries)).unwrap();
    (tmp, archive)
}

/// Runs `relay` with a config path that does not exist; dry runs fall back
/// to the built-in defaults.
fn run_relay(dir: &Path, args: &[&str]) -> (String, String, bool) {
    run_relay_with_config(&dir.join("missing.toml"), args)
}

fn run_relay_with_config(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_relay"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap();
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn dry_run(dir: &Path, archive: &Path) -> (String, String, bool) {
    run_relay(
        dir,
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "c",
            "--doc-type",
            "t",
            "--dry-run",
            "--progress",
            "off",
        ],
    )
}

fn line_for<'a>(stdout: &'a str, name: &str) -> &'a str {
    stdout
        .lines()
        .find(|l| l.trim_start().starts_with(name))
        .unwrap_or_else(|| panic!("no line for {} in:\n{}", name, stdout))
}

#[test]
fn file_support_pdf_and_docx_planned() {
    let (tmp, archive) = setup_archive(vec![
        ("report.pdf", minimal_pdf_with_text("relay test phrase")),
        ("memo.docx", minimal_docx_with_text("office test phrase")),
        ("notes.txt", b"plain text notes".to_vec()),
    ]);
    let (stdout, stderr, ok) = dry_run(tmp.path(), &archive);
    assert!(ok, "dry run failed: {}", stderr);

    for name in ["report.pdf", "memo.docx", "notes.txt"] {
        let line = line_for(&stdout, name);
        assert!(line.contains("small"), "{}", line);
        assert!(line.contains("1 call(s)"), "{}", line);
    }
    assert!(stdout.contains("calls planned: 3"), "{}", stdout);
    assert!(stdout.contains("extensions: docx=1 pdf=1 txt=1"), "{}", stdout);
    assert!(!stdout.contains("    [0]"), "{}", stdout);
}

#[test]
fn file_support_preview_prints_chunk_starts() {
    let long = format!("opening words {}", "z".repeat(400));
    let (tmp, archive) = setup_archive(vec![
        ("memo.docx", minimal_docx_with_text("office test phrase")),
        ("long.txt", long.into_bytes()),
    ]);
    let (stdout, stderr, ok) = run_relay(
        tmp.path(),
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "c",
            "--doc-type",
            "t",
            "--dry-run",
            "--preview",
            "--progress",
            "off",
        ],
    );
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("    [0] office test phrase"), "{}", stdout);

    let long_preview = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("[0] opening words"))
        .unwrap_or_else(|| panic!("no preview line in:\n{}", stdout));
    let shown = long_preview.trim_start().trim_start_matches("[0] ");
    assert_eq!(shown.chars().count(), 300);
}

#[test]
fn file_support_preview_requires_dry_run() {
    let (tmp, archive) = setup_archive(vec![("a.txt", b"text".to_vec())]);
    let (_stdout, stderr, ok) = run_relay(
        tmp.path(),
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "c",
            "--doc-type",
            "t",
            "--preview",
        ],
    );
    assert!(!ok);
    assert!(stderr.contains("--dry-run"), "{}", stderr);
}

#[test]
fn file_support_dry_run_rejects_invalid_config_file() {
    let (tmp, archive) = setup_archive(vec![("a.txt", b"text".to_vec())]);
    let config = tmp.path().join("relay.toml");
    std::fs::write(
        &config,
        "[remote]\nbase_url = \"http://127.0.0.1:9\"\n\n[chunking]\nmax_words = 0\n",
    )
    .unwrap();
    let (stdout, stderr, ok) = run_relay_with_config(
        &config,
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "c",
            "--doc-type",
            "t",
            "--dry-run",
            "--progress",
            "off",
        ],
    );
    assert!(!ok, "invalid config accepted: {}", stdout);
    assert!(stderr.contains("chunking.max_words"), "{}", stderr);
}

#[test]
fn file_support_unsupported_and_broken_files_skipped() {
    let (tmp, archive) = setup_archive(vec![
        ("photo.png", vec![0x89, b'P', b'N', b'G']),
        ("broken.pdf", b"not really a pdf".to_vec()),
        ("broken.docx", b"not a zip either".to_vec()),
        ("ok.md", b"# heading\n\nbody".to_vec()),
    ]);
    let (stdout, stderr, ok) = dry_run(tmp.path(), &archive);
    assert!(ok, "dry run failed: {}", stderr);

    assert!(line_for(&stdout, "photo.png").contains("skipped: unsupported file type: .png"));
    assert!(line_for(&stdout, "broken.pdf").contains("skipped:"));
    assert!(line_for(&stdout, "broken.docx").contains("skipped: word-processor extraction failed"));
    assert!(line_for(&stdout, "ok.md").contains("1 call(s)"));
    assert!(stdout.contains("calls planned: 1"), "{}", stdout);
}

#[test]
fn file_support_corrupt_archive_fails() {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("upload.zip");
    std::fs::write(&archive, b"PK but not really").unwrap();
    let (_stdout, stderr, ok) = dry_run(tmp.path(), &archive);
    assert!(!ok);
    assert!(stderr.contains("archive error"), "{}", stderr);
}

#[test]
fn file_support_invalid_progress_mode_rejected() {
    let (tmp, archive) = setup_archive(vec![("a.txt", b"text".to_vec())]);
    let (_stdout, stderr, ok) = run_relay(
        tmp.path(),
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "c",
            "--doc-type",
            "t",
            "--dry-run",
            "--progress",
            "loud",
        ],
    );
    assert!(!ok);
    assert!(stderr.contains("--progress"), "{}", stderr);
}

#[test]
fn file_support_send_requires_config() {
    let (tmp, archive) = setup_archive(vec![("a.txt", b"text".to_vec())]);
    let (_stdout, _stderr, ok) = run_relay(
        tmp.path(),
        &[
            "ingest",
            archive.to_str().unwrap(),
            "--collection",
            "c",
            "--doc-type",
            "t",
        ],
    );
    assert!(!ok);
}
