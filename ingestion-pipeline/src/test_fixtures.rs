//! Small, valid documents assembled in code for extractor and pipeline tests.

use std::io::{Cursor, Write};

fn pdf_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

/// PDF with one page per entry of `pages`, each line drawn with Helvetica.
///
/// The xref table is built from the real byte offsets so strict parsers accept it.
pub fn pdf_with_pages(pages: &[&[&str]]) -> Vec<u8> {
    let page_count = pages.len();
    let page_obj = |i: usize| 4 + i * 2;
    let content_obj = |i: usize| 5 + i * 2;
    let object_count = 3 + page_count * 2;

    let mut out = Vec::new();
    let mut offsets = Vec::with_capacity(object_count);
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", page_obj(i)))
        .collect();
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {page_count} >> endobj\n",
            kids.join(" ")
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, lines) in pages.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_obj(i),
                content_obj(i)
            )
            .as_bytes(),
        );

        let shown: Vec<String> = lines
            .iter()
            .map(|line| format!("({}) Tj T*", pdf_escape(line)))
            .collect();
        let content = format!("BT /F1 12 Tf 16 TL 72 720 Td {} ET", shown.join(" "));
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{content}\nendstream endobj\n",
                content_obj(i),
                content.len()
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", object_count + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{xref_start}\n%%EOF\n",
            object_count + 1
        )
        .as_bytes(),
    );
    out
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// DOCX whose body holds one `w:p` per paragraph.
pub fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", xml_escape(p)))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{body}</w:body></w:document>"
    );

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .expect("start docx entry");
        zip.write_all(xml.as_bytes()).expect("write docx entry");
        zip.finish().expect("finish docx");
    }
    buf
}

const DOC_TEXT_OFFSET: usize = 1024;

/// Word 97 binary document with a single piece holding `text`.
///
/// `utf16` stores the piece as UTF-16LE, otherwise it is stored compressed as cp1252.
pub fn doc_with_text(text: &str, utf16: bool) -> Vec<u8> {
    let ccp_text = u32::try_from(text.encode_utf16().count()).expect("short text");

    let mut word = vec![0u8; DOC_TEXT_OFFSET];
    word[0..2].copy_from_slice(&0xA5ECu16.to_le_bytes());
    // fWhichTblStm: the piece table lives in 1Table.
    word[0x0A..0x0C].copy_from_slice(&0x0200u16.to_le_bytes());

    let csw: u16 = 14;
    word[32..34].copy_from_slice(&csw.to_le_bytes());
    let cslw_at = 34 + usize::from(csw) * 2;
    let cslw: u16 = 22;
    word[cslw_at..cslw_at + 2].copy_from_slice(&cslw.to_le_bytes());
    let rglw_at = cslw_at + 2;
    word[rglw_at + 12..rglw_at + 16].copy_from_slice(&ccp_text.to_le_bytes());
    let cb_at = rglw_at + usize::from(cslw) * 4;
    let pairs: u16 = 93;
    word[cb_at..cb_at + 2].copy_from_slice(&pairs.to_le_bytes());
    let clx_pair_at = cb_at + 2 + 33 * 8;

    let fc = if utf16 {
        for unit in text.encode_utf16() {
            word.extend_from_slice(&unit.to_le_bytes());
        }
        u32::try_from(DOC_TEXT_OFFSET).expect("offset")
    } else {
        let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(text);
        word.extend_from_slice(&encoded);
        u32::try_from(DOC_TEXT_OFFSET * 2).expect("offset") | 0x4000_0000
    };

    let mut plc = Vec::new();
    plc.extend_from_slice(&0u32.to_le_bytes());
    plc.extend_from_slice(&ccp_text.to_le_bytes());
    plc.extend_from_slice(&0u16.to_le_bytes());
    plc.extend_from_slice(&fc.to_le_bytes());
    plc.extend_from_slice(&0u16.to_le_bytes());

    let mut table = vec![0x02u8];
    table.extend_from_slice(&u32::try_from(plc.len()).expect("plc").to_le_bytes());
    table.extend_from_slice(&plc);

    let lcb_clx = u32::try_from(table.len()).expect("clx");
    word[clx_pair_at..clx_pair_at + 4].copy_from_slice(&0u32.to_le_bytes());
    word[clx_pair_at + 4..clx_pair_at + 8].copy_from_slice(&lcb_clx.to_le_bytes());

    let mut compound =
        cfb::CompoundFile::create(Cursor::new(Vec::new())).expect("create compound file");
    {
        let mut stream = compound
            .create_stream("/WordDocument")
            .expect("WordDocument stream");
        stream.write_all(&word).expect("write WordDocument");
        stream.flush().expect("flush WordDocument");
    }
    {
        let mut stream = compound.create_stream("/1Table").expect("1Table stream");
        stream.write_all(&table).expect("write 1Table");
        stream.flush().expect("flush 1Table");
    }
    compound.flush().expect("flush compound file");
    compound.into_inner().into_inner()
}
