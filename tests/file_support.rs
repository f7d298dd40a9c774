//! Extraction of real file formats, using minimal hand-built fixtures.

use study_insights::extract::{Extractor, PdfStrategy, WARN_LATIN1};
use study_insights::models::{ExtractionMethod, MIME_DOCX, MIME_PDF};

/// Minimal valid PDF with one page showing `phrase` in Helvetica.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx (ZIP) whose body has one paragraph per entry in `paragraphs`.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Always errors, standing in for a primary PDF library that chokes.
struct Refuses;

impl PdfStrategy for Refuses {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfExtract
    }
    fn extract(&self, _bytes: &[u8]) -> Result<String, study_insights::extract::ExtractError> {
        Err(study_insights::extract::ExtractError::Pdf(
            "unsupported font encoding".into(),
        ))
    }
}

#[test]
fn pdf_text_is_extracted() {
    let pdf = minimal_pdf_with_phrase("cell biology exam phrase");
    let extracted = Extractor::new().extract(&pdf, "pdf");
    assert!(extracted.success, "warnings: {:?}", extracted.warnings);
    assert!(extracted.text.contains("cell biology exam phrase"));
    assert_eq!(extracted.word_count, 4);
}

#[test]
fn pdf_falls_back_when_primary_fails() {
    let pdf = minimal_pdf_with_phrase("fallback phrase");
    let extractor = Extractor::with_pdf_strategies(
        Box::new(Refuses),
        Box::new(study_insights::extract::LopdfStrategy),
    );
    let extracted = extractor.extract(&pdf, MIME_PDF);
    assert!(extracted.success, "warnings: {:?}", extracted.warnings);
    assert_eq!(extracted.method, ExtractionMethod::LopdfFallback);
    assert!(extracted.text.contains("fallback phrase"));
    assert_eq!(extracted.text.matches("fallback phrase").count(), 1);
    assert!(extracted
        .warnings
        .iter()
        .any(|w| w.contains("unsupported font encoding")));
}

#[test]
fn corrupted_pdf_fails_with_status() {
    let extracted = Extractor::new().extract(b"%PDF-1.7\nthis is not really a pdf", "pdf");
    assert!(!extracted.success);
    assert_eq!(extracted.word_count, 0);
    assert_eq!(extracted.warnings.len(), 1);
}

#[test]
fn docx_paragraphs_are_separated() {
    let docx = minimal_docx(&["Chapter one: kinematics.", "Chapter two: dynamics."]);
    let extracted = Extractor::new().extract(&docx, MIME_DOCX);
    assert!(extracted.success);
    assert_eq!(extracted.method, ExtractionMethod::DocxXml);
    assert!(extracted.text.contains("Chapter one: kinematics."));
    assert!(extracted.text.contains("Chapter two: dynamics."));
    assert!(!extracted.text.contains("kinematics.Chapter"));
    assert_eq!(extracted.word_count, 6);
}

#[test]
fn docx_without_document_part_fails() {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"not a word document").unwrap();
        zip.finish().unwrap();
    }
    let extracted = Extractor::new().extract(&buf, "docx");
    assert!(!extracted.success);
}

#[test]
fn plain_text_utf8_and_latin1() {
    let utf8 = Extractor::new().extract("Größe und Maß".as_bytes(), "txt");
    assert!(utf8.success);
    assert_eq!(utf8.text, "Größe und Maß");
    assert_eq!(utf8.method, ExtractionMethod::PlainUtf8);

    // "café" in latin-1
    let latin1 = Extractor::new().extract(&[0x63, 0x61, 0x66, 0xE9], "text/plain");
    assert!(latin1.success);
    assert_eq!(latin1.text, "café");
    assert_eq!(latin1.method, ExtractionMethod::PlainLatin1);
    assert!(latin1.warnings.iter().any(|w| w == WARN_LATIN1));
}

#[test]
fn empty_text_file_succeeds_with_no_words() {
    let extracted = Extractor::new().extract(b"", "txt");
    assert!(extracted.success);
    assert_eq!(extracted.word_count, 0);
    assert!(extracted.is_empty());
}

#[test]
fn unsupported_type_fails_without_panicking() {
    let extracted = Extractor::new().extract(b"\x89PNG", "image/png");
    assert!(!extracted.success);
    assert!(extracted.warnings[0].contains("unsupported"));
}
