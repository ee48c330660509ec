use std::io::{Cursor, Read};

use async_trait::async_trait;
use bytes::Bytes;
use common::{error::AppError, utils::ingest_limits::DocumentFormat};
use quick_xml::events::Event;

use super::file_text_extraction::TextExtractor;

/// Upper bound on a decompressed ZIP entry or OLE stream we are willing to read.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY: &str = "word/document.xml";

/// Office Open XML (`.docx`) documents.
pub struct DocxExtractor;

/// Word 97-2003 binary (`.doc`) documents.
pub struct LegacyDocExtractor;

#[async_trait]
impl TextExtractor for DocxExtractor {
    fn name(&self) -> &'static str {
        "docx"
    }

    async fn extract(&self, bytes: Bytes, _format: DocumentFormat) -> Result<String, AppError> {
        run_blocking("DOCX", move || extract_docx(&bytes)).await
    }
}

#[async_trait]
impl TextExtractor for LegacyDocExtractor {
    fn name(&self) -> &'static str {
        "doc"
    }

    async fn extract(&self, bytes: Bytes, _format: DocumentFormat) -> Result<String, AppError> {
        run_blocking("DOC", move || extract_doc(&bytes)).await
    }
}

async fn run_blocking<F>(kind: &'static str, job: F) -> Result<String, AppError>
where
    F: FnOnce() -> Result<String, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| AppError::Extraction(format!("{kind} parser crashed: {err}")))?
}

fn docx_error(err: impl std::fmt::Display) -> AppError {
    AppError::Extraction(format!("Failed to read DOCX: {err}"))
}

fn extract_docx(bytes: &[u8]) -> Result<String, AppError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(docx_error)?;
    let entry = archive
        .by_name(DOCX_BODY)
        .map_err(|_| docx_error(format!("{DOCX_BODY} not found")))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(docx_error)?;
    if u64::try_from(xml.len()).unwrap_or(u64::MAX) >= MAX_ENTRY_BYTES {
        return Err(docx_error(format!("{DOCX_BODY} exceeds size limit")));
    }

    docx_body_text(&xml)
}

/// Collects `w:t` runs; paragraphs end with a newline, `w:tab` and `w:br` are kept.
fn docx_body_text(xml: &[u8]) -> Result<String, AppError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(docx_error)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(text) if in_text => {
                out.push_str(&text.unescape().map_err(docx_error)?);
            }
            Event::CData(data) if in_text => {
                out.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn doc_error(err: impl std::fmt::Display) -> AppError {
    AppError::Extraction(format!("Failed to read DOC: {err}"))
}

// File Information Block layout of Word 97 and later.
const FIB_MAGIC: u16 = 0xA5EC;
const FIB_FLAGS_OFFSET: usize = 0x0A;
const FIB_ENCRYPTED: u16 = 0x0100;
const FIB_WHICH_TABLE: u16 = 0x0200;
const FIB_BASE_LEN: usize = 32;
const RGLW_CCP_TEXT: usize = 3;
const RGFCLCB_CLX: usize = 33;
const PIECE_DESCRIPTOR_LEN: usize = 8;
const COMPRESSED_FLAG: u32 = 0x4000_0000;

/// Text-relevant fields of the File Information Block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FibSummary {
    table_stream: &'static str,
    ccp_text: u32,
    fc_clx: u32,
    lcb_clx: u32,
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn truncated() -> AppError {
    doc_error("file information block is truncated")
}

fn parse_fib(word: &[u8]) -> Result<FibSummary, AppError> {
    if read_u16(word, 0) != Some(FIB_MAGIC) {
        return Err(doc_error("not a Word 97-2003 document"));
    }
    let flags = read_u16(word, FIB_FLAGS_OFFSET).ok_or_else(truncated)?;
    if flags & FIB_ENCRYPTED != 0 {
        return Err(doc_error("unsupported encoding: document is encrypted"));
    }
    let table_stream = if flags & FIB_WHICH_TABLE != 0 {
        "/1Table"
    } else {
        "/0Table"
    };

    let csw = usize::from(read_u16(word, FIB_BASE_LEN).ok_or_else(truncated)?);
    let cslw_at = FIB_BASE_LEN + 2 + csw * 2;
    let cslw = usize::from(read_u16(word, cslw_at).ok_or_else(truncated)?);
    let rglw_at = cslw_at + 2;
    let cb_at = rglw_at + cslw * 4;
    let pairs = usize::from(read_u16(word, cb_at).ok_or_else(truncated)?);
    let rgfclcb_at = cb_at + 2;

    if cslw <= RGLW_CCP_TEXT || pairs <= RGFCLCB_CLX {
        return Err(truncated());
    }

    let ccp_text = read_u32(word, rglw_at + RGLW_CCP_TEXT * 4).ok_or_else(truncated)?;
    let clx_at = rgfclcb_at + RGFCLCB_CLX * 8;
    let fc_clx = read_u32(word, clx_at).ok_or_else(truncated)?;
    let lcb_clx = read_u32(word, clx_at + 4).ok_or_else(truncated)?;

    Ok(FibSummary {
        table_stream,
        ccp_text,
        fc_clx,
        lcb_clx,
    })
}

/// One entry of the piece table: a run of characters stored contiguously in the
/// WordDocument stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    cp_start: u32,
    cp_end: u32,
    byte_offset: usize,
    compressed: bool,
}

fn parse_piece_table(clx: &[u8]) -> Result<Vec<Piece>, AppError> {
    let mut pos = 0usize;

    // Skip Prc blocks (formatting) until the Pcdt.
    while clx.get(pos) == Some(&0x01) {
        let size = read_u16(clx, pos + 1)
            .map(|raw| i16::from_le_bytes(raw.to_le_bytes()))
            .ok_or_else(|| doc_error("piece table is truncated"))?;
        let size = usize::try_from(size).map_err(|_| doc_error("invalid formatting block"))?;
        pos = pos + 3 + size;
    }

    if clx.get(pos) != Some(&0x02) {
        return Err(doc_error("piece table not found"));
    }
    let lcb = read_u32(clx, pos + 1).ok_or_else(|| doc_error("piece table is truncated"))?;
    let plc_at = pos + 5;
    let lcb = usize::try_from(lcb).map_err(|_| doc_error("piece table too large"))?;
    let plc = clx
        .get(plc_at..plc_at.saturating_add(lcb))
        .ok_or_else(|| doc_error("piece table is truncated"))?;

    if plc.len() < 4 || (plc.len() - 4) % (4 + PIECE_DESCRIPTOR_LEN) != 0 {
        return Err(doc_error("piece table has an invalid length"));
    }
    let count = (plc.len() - 4) / (4 + PIECE_DESCRIPTOR_LEN);
    let descriptors_at = (count + 1) * 4;

    let mut pieces = Vec::with_capacity(count);
    for i in 0..count {
        let cp_start = read_u32(plc, i * 4).ok_or_else(truncated)?;
        let cp_end = read_u32(plc, (i + 1) * 4).ok_or_else(truncated)?;
        let fc = read_u32(plc, descriptors_at + i * PIECE_DESCRIPTOR_LEN + 2)
            .ok_or_else(|| doc_error("piece descriptor is truncated"))?;

        let compressed = fc & COMPRESSED_FLAG != 0;
        let raw_offset = usize::try_from(fc & !COMPRESSED_FLAG & 0x3FFF_FFFF)
            .map_err(|_| doc_error("piece offset out of range"))?;
        let byte_offset = if compressed { raw_offset / 2 } else { raw_offset };

        if cp_end < cp_start {
            return Err(doc_error("piece table is not ordered"));
        }
        pieces.push(Piece {
            cp_start,
            cp_end,
            byte_offset,
            compressed,
        });
    }

    Ok(pieces)
}

fn decode_pieces(word: &[u8], pieces: &[Piece], ccp_text: u32) -> Result<String, AppError> {
    let mut out = String::new();

    for piece in pieces {
        if piece.cp_start >= ccp_text {
            break;
        }
        let chars = usize::try_from(piece.cp_end.min(ccp_text) - piece.cp_start)
            .map_err(|_| doc_error("piece too large"))?;

        if piece.compressed {
            let raw = word
                .get(piece.byte_offset..piece.byte_offset.saturating_add(chars))
                .ok_or_else(|| doc_error("piece points outside the document stream"))?;
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(raw);
            out.push_str(&decoded);
        } else {
            let raw = word
                .get(piece.byte_offset..piece.byte_offset.saturating_add(chars * 2))
                .ok_or_else(|| doc_error("piece points outside the document stream"))?;
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            out.push_str(&String::from_utf16_lossy(&units));
        }
    }

    Ok(out)
}

/// Maps Word's special characters to plain text and drops field instructions.
fn clean_word_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // Per open field: true while inside its instruction part.
    let mut in_instruction: Vec<bool> = Vec::new();

    for ch in raw.chars() {
        match ch {
            '\u{13}' => in_instruction.push(true),
            '\u{14}' => {
                if let Some(state) = in_instruction.last_mut() {
                    *state = false;
                }
            }
            '\u{15}' => {
                in_instruction.pop();
            }
            _ if in_instruction.iter().any(|state| *state) => {}
            '\r' | '\u{0b}' | '\u{0c}' => out.push('\n'),
            '\u{07}' => out.push('\t'),
            '\t' | '\n' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out
}

fn read_stream<F: Read + std::io::Seek>(
    file: &mut cfb::CompoundFile<F>,
    name: &str,
) -> Result<Vec<u8>, AppError> {
    let stream = file
        .open_stream(name)
        .map_err(|err| doc_error(format!("{name} stream: {err}")))?;
    let mut data = Vec::new();
    stream
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut data)
        .map_err(doc_error)?;
    Ok(data)
}

fn extract_doc(bytes: &[u8]) -> Result<String, AppError> {
    let mut file = cfb::CompoundFile::open(Cursor::new(bytes)).map_err(doc_error)?;
    let word = read_stream(&mut file, "/WordDocument")?;
    let fib = parse_fib(&word)?;

    let table = read_stream(&mut file, fib.table_stream)?;
    let clx_start = usize::try_from(fib.fc_clx).map_err(|_| truncated())?;
    let clx_len = usize::try_from(fib.lcb_clx).map_err(|_| truncated())?;
    let clx = table
        .get(clx_start..clx_start.saturating_add(clx_len))
        .ok_or_else(|| doc_error("piece table lies outside the table stream"))?;

    let pieces = parse_piece_table(clx)?;
    let raw = decode_pieces(&word, &pieces, fib.ccp_text)?;
    Ok(clean_word_text(&raw))
}
