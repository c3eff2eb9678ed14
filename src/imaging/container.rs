//! Text metadata inside PNG, JPEG and WebP containers.
//!
//! Two carriers are supported:
//!
//! | Carrier | Containers | Location |
//! |---|---|---|
//! | `Comment` text chunk | PNG | `tEXt`, `zTXt` or `iTXt` chunk with keyword `Comment` |
//! | EXIF `ImageDescription` (tag 270) | JPEG, WebP (PNG read-only) | primary IFD of the EXIF block |
//!
//! Reading the description goes through two independent lookups: the
//! structured reader in `kamadak-exif`, which walks the whole container, and
//! a direct parse of the raw EXIF block that `img-parts` pulls out. They
//! disagree on some real-world files (WebP `EXIF` chunks with an `Exif\0\0`
//! prefix, for one), so the first non-empty answer wins.
//!
//! Writing is container surgery: chunks and segments are swapped in place and
//! the compressed image data is copied through byte-for-byte, so embedding
//! never re-encodes pixels.

use exif::experimental::Writer as ExifWriter;
use exif::{Field, In, Reader as ExifReader, Tag, Value};
use flate2::read::ZlibDecoder;
use img_parts::jpeg::{Jpeg, JpegSegment, markers};
use img_parts::png::{Png, PngChunk};
use img_parts::webp::WebP;
use img_parts::{Bytes, ImageEXIF};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;

const CHUNK_TEXT: [u8; 4] = *b"tEXt";
const CHUNK_ZTXT: [u8; 4] = *b"zTXt";
const CHUNK_ITXT: [u8; 4] = *b"iTXt";
const CHUNK_IDAT: [u8; 4] = *b"IDAT";
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// PNG text keyword that carries the metadata blob.
pub const COMMENT_KEYWORD: &str = "Comment";

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unrecognized image container")]
    Unrecognized,
    #[error("Malformed {kind} container: {source}")]
    Malformed {
        kind: Container,
        source: img_parts::Error,
    },
    #[error("EXIF error: {0}")]
    Exif(#[from] exif::Error),
    #[error("{0} does not carry an EXIF description")]
    NoExifCarrier(Container),
}

/// Image container format, detected from file signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Png,
    Jpeg,
    WebP,
}

impl Container {
    /// Detect the container from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Container> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Container::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8]) {
            Some(Container::Jpeg)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Container::WebP)
        } else {
            None
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Container::Png => "PNG",
            Container::Jpeg => "JPEG",
            Container::WebP => "WebP",
        })
    }
}

/// Text fields found in a container. Empty strings are reported as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedText {
    pub container: Option<Container>,
    /// PNG `Comment` text chunk.
    pub comment: Option<String>,
    /// EXIF `ImageDescription`.
    pub description: Option<String>,
}

/// Read the comment chunk and EXIF description from an encoded image.
pub fn read_embedded_text(data: Vec<u8>) -> Result<EmbeddedText, ContainerError> {
    let kind = Container::sniff(&data).ok_or(ContainerError::Unrecognized)?;
    let bytes = Bytes::from(data);
    let malformed = |source| ContainerError::Malformed { kind, source };

    let (comment, exif_block) = match kind {
        Container::Png => {
            let png = Png::from_bytes(bytes.clone()).map_err(malformed)?;
            (png_comment(&png), png.exif())
        }
        Container::Jpeg => {
            let jpeg = Jpeg::from_bytes(bytes.clone()).map_err(malformed)?;
            (None, jpeg.exif())
        }
        Container::WebP => {
            let webp = WebP::from_bytes(bytes.clone()).map_err(malformed)?;
            (None, webp.exif())
        }
    };

    let description = description_from_container(&bytes)
        .or_else(|| exif_block.and_then(|block| description_from_block(block.to_vec())));

    Ok(EmbeddedText {
        container: Some(kind),
        comment: non_empty(comment),
        description: non_empty(description),
    })
}

/// Replace the PNG `Comment` text with `text`.
///
/// Existing `Comment` chunks of any text type are dropped; other text chunks
/// are kept. The new chunk is `tEXt` when `text` is Latin-1 and uncompressed
/// `iTXt` otherwise, placed before the first `IDAT`.
pub fn write_png_comment(data: Vec<u8>, text: &str) -> Result<Vec<u8>, ContainerError> {
    let mut png = Png::from_bytes(Bytes::from(data)).map_err(|source| {
        ContainerError::Malformed {
            kind: Container::Png,
            source,
        }
    })?;

    png.chunks_mut()
        .retain(|chunk| text_keyword(chunk).as_deref() != Some(COMMENT_KEYWORD));

    let chunk = encode_text_chunk(COMMENT_KEYWORD, text);
    let chunks = png.chunks_mut();
    let pos = chunks
        .iter()
        .position(|c| c.kind() == CHUNK_IDAT)
        .unwrap_or(chunks.len().saturating_sub(1));
    chunks.insert(pos, chunk);

    let mut out = Vec::new();
    png.encoder().write_to(&mut out)?;
    Ok(out)
}

/// Replace the EXIF block of a JPEG or WebP with one holding only
/// `ImageDescription = text`.
pub fn write_exif_description(data: Vec<u8>, text: &str) -> Result<Vec<u8>, ContainerError> {
    let kind = Container::sniff(&data).ok_or(ContainerError::Unrecognized)?;
    let malformed = |source| ContainerError::Malformed { kind, source };
    let block = encode_exif_block(text)?;

    let mut out = Vec::new();
    match kind {
        Container::Jpeg => {
            let mut jpeg = Jpeg::from_bytes(Bytes::from(data)).map_err(malformed)?;
            jpeg.set_exif(None);
            let mut contents = Vec::with_capacity(EXIF_PREFIX.len() + block.len());
            contents.extend_from_slice(EXIF_PREFIX);
            contents.extend_from_slice(&block);
            let segment = JpegSegment::new_with_contents(markers::APP1, Bytes::from(contents));
            let segments = jpeg.segments_mut();
            // EXIF goes right after SOI, or after a leading JFIF APP0.
            let pos = match segments.first() {
                Some(first) if first.marker() == markers::APP0 => 1,
                _ => 0,
            };
            segments.insert(pos, segment);
            jpeg.encoder().write_to(&mut out)?;
        }
        Container::WebP => {
            let mut webp = WebP::from_bytes(Bytes::from(data)).map_err(malformed)?;
            webp.set_exif(Some(Bytes::from(block)));
            webp.encoder().write_to(&mut out)?;
        }
        Container::Png => return Err(ContainerError::NoExifCarrier(kind)),
    }
    Ok(out)
}

/// Write `data` to `path` through a temporary sibling and a rename, so a
/// reader never observes a half-written file.
pub fn replace_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, data)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// EXIF
// ---------------------------------------------------------------------------

/// TIFF-structured EXIF block with a single primary-IFD `ImageDescription`.
fn encode_exif_block(text: &str) -> Result<Vec<u8>, ContainerError> {
    let field = Field {
        tag: Tag::ImageDescription,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    };
    let mut writer = ExifWriter::new();
    writer.push_field(&field);
    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf, false)?;
    Ok(buf.into_inner())
}

/// Lookup 1: let the EXIF reader locate the block in the container.
fn description_from_container(bytes: &[u8]) -> Option<String> {
    match ExifReader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif
            .get_field(Tag::ImageDescription, In::PRIMARY)
            .and_then(|f| field_text(&f.value)),
        Err(e) => {
            log::debug!("container EXIF lookup failed: {e}");
            None
        }
    }
}

/// Lookup 2: parse a raw EXIF block already extracted from the container.
fn description_from_block(mut block: Vec<u8>) -> Option<String> {
    if block.starts_with(EXIF_PREFIX) {
        block.drain(..EXIF_PREFIX.len());
    }
    match ExifReader::new().read_raw(block) {
        Ok(exif) => exif
            .get_field(Tag::ImageDescription, In::PRIMARY)
            .and_then(|f| field_text(&f.value)),
        Err(e) => {
            log::debug!("raw EXIF block lookup failed: {e}");
            None
        }
    }
}

fn field_text(value: &Value) -> Option<String> {
    let raw = match value {
        Value::Ascii(parts) => parts.first()?.clone(),
        Value::Undefined(bytes, _) => bytes.clone(),
        _ => return None,
    };
    let trimmed: &[u8] = match raw.iter().rposition(|&b| b != 0) {
        Some(end) => &raw[..=end],
        None => &[],
    };
    String::from_utf8(trimmed.to_vec()).ok()
}

// ---------------------------------------------------------------------------
// PNG text chunks
// ---------------------------------------------------------------------------

/// The last `Comment` text chunk wins, as with repeated keys in a text map.
fn png_comment(png: &Png) -> Option<String> {
    png.chunks()
        .iter()
        .filter_map(decode_text_chunk)
        .filter(|(keyword, _)| keyword == COMMENT_KEYWORD)
        .map(|(_, text)| text)
        .last()
}

fn text_keyword(chunk: &PngChunk) -> Option<String> {
    let kind = chunk.kind();
    if kind != CHUNK_TEXT && kind != CHUNK_ZTXT && kind != CHUNK_ITXT {
        return None;
    }
    let contents = chunk.contents();
    let end = contents.iter().position(|&b| b == 0)?;
    Some(latin1(&contents[..end]))
}

/// Decode a `tEXt`, `zTXt` or `iTXt` chunk into `(keyword, text)`.
fn decode_text_chunk(chunk: &PngChunk) -> Option<(String, String)> {
    let contents: &[u8] = chunk.contents();
    let nul = contents.iter().position(|&b| b == 0)?;
    let keyword = latin1(&contents[..nul]);
    let rest = &contents[nul + 1..];

    let text = match chunk.kind() {
        CHUNK_TEXT => latin1(rest),
        CHUNK_ZTXT => {
            // compression method byte, then a zlib stream
            let (_method, stream) = rest.split_first()?;
            latin1(&inflate(stream)?)
        }
        CHUNK_ITXT => {
            let (&compressed, rest) = rest.split_first()?;
            let (_method, rest) = rest.split_first()?;
            let lang_end = rest.iter().position(|&b| b == 0)?;
            let rest = &rest[lang_end + 1..];
            let translated_end = rest.iter().position(|&b| b == 0)?;
            let body = &rest[translated_end + 1..];
            let body = if compressed == 1 {
                inflate(body)?
            } else {
                body.to_vec()
            };
            String::from_utf8(body).ok()?
        }
        _ => return None,
    };
    Some((keyword, text))
}

fn encode_text_chunk(keyword: &str, text: &str) -> PngChunk {
    let mut contents = Vec::with_capacity(keyword.len() + text.len() + 5);
    contents.extend_from_slice(keyword.as_bytes());
    contents.push(0);

    if text.chars().all(|c| (c as u32) < 0x100) {
        contents.extend(text.chars().map(|c| c as u8));
        PngChunk::new(CHUNK_TEXT, Bytes::from(contents))
    } else {
        // uncompressed, default compression method, empty language and
        // translated keyword
        contents.extend_from_slice(&[0, 0, 0, 0]);
        contents.extend_from_slice(text.as_bytes());
        PngChunk::new(CHUNK_ITXT, Bytes::from(contents))
    }
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    match ZlibDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            log::debug!("failed to inflate PNG text chunk: {e}");
            None
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
