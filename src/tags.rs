//! Tag codec: reads and writes one field (or the embedded art) on one file.
//!
//! The history engine only sees the [`TagCodec`] trait. Field-name quirks
//! (case, aliases, ID3v2 frame ids) are resolved here through
//! [`canonical_field`], so callers never try key variants themselves.
//! All functions are synchronous; async callers use `spawn_blocking`.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use lofty::ape::{ApeItem, ApeTag};
use lofty::config::{ParseOptions, ParsingMode, WriteOptions};
use lofty::file::{AudioFile, FileType, TaggedFile, TaggedFileExt};
use lofty::flac::FlacFile;
use lofty::id3::v2::Id3v2Tag;
use lofty::iff::wav::WavFile;
use lofty::mp4::{Atom, AtomData, AtomIdent, Ilst, Mp4File};
use lofty::mpeg::MpegFile;
use lofty::ogg::{OpusFile, VorbisComments, VorbisFile};
use lofty::picture::{Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagType};
use lofty::wavpack::WavPackFile;
use unicode_casefold::UnicodeCaseFold;

use crate::audio;

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    /// lofty open/read/write failures.
    #[error("{0}")]
    Io(String),
    /// Unknown field or invalid value.
    #[error("{0}")]
    Validation(String),
    /// File doesn't support the requested operation.
    #[error("{0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Field catalogue
// ---------------------------------------------------------------------------

/// Canonical field names, in a stable order.
pub const ALL_FIELDS: &[&str] = &[
    "artist",
    "title",
    "album",
    "album_artist",
    "genre",
    "year",
    "track",
    "disc",
    "comment",
    "publisher",
    "bpm",
    "key",
    "composer",
    "remixer",
];

/// ID3v2 frame id for each canonical field.
const ID3V2_FRAMES: &[(&str, &str)] = &[
    ("artist", "TPE1"),
    ("title", "TIT2"),
    ("album", "TALB"),
    ("album_artist", "TPE2"),
    ("genre", "TCON"),
    ("year", "TDRC"),
    ("track", "TRCK"),
    ("disc", "TPOS"),
    ("comment", "COMM"),
    ("publisher", "TPUB"),
    ("bpm", "TBPM"),
    ("key", "TKEY"),
    ("composer", "TCOM"),
    ("remixer", "TPE4"),
];

/// Formats whose tags are keyed by ID3v2 frame ids.
const FRAME_ID_FORMATS: &[&str] = &["mp3", "wav"];

fn casefold(s: &str) -> String {
    s.trim().case_fold().collect()
}

/// Resolve any spelling of a field (case, aliases, ID3v2 frame ids) to its
/// canonical name.
pub fn canonical_field(name: &str) -> Option<&'static str> {
    let folded = casefold(name);
    if let Some(&field) = ALL_FIELDS.iter().find(|&&f| f == folded) {
        return Some(field);
    }
    let alias = match folded.as_str() {
        "albumartist" | "album artist" | "album-artist" => "album_artist",
        "date" | "tyer" => "year",
        "tracknumber" | "track_number" => "track",
        "discnumber" | "disc_number" => "disc",
        "label" | "organization" => "publisher",
        "initialkey" | "initial_key" => "key",
        "description" => "comment",
        _ => {
            return ID3V2_FRAMES
                .iter()
                .find(|(_, frame)| casefold(frame) == folded)
                .map(|(field, _)| *field);
        }
    };
    Some(alias)
}

/// Map a canonical field name to the primary `ItemKey`.
fn field_to_item_key(field: &str) -> Option<ItemKey> {
    match field {
        "artist" => Some(ItemKey::TrackArtist),
        "title" => Some(ItemKey::TrackTitle),
        "album" => Some(ItemKey::AlbumTitle),
        "album_artist" => Some(ItemKey::AlbumArtist),
        "genre" => Some(ItemKey::Genre),
        "year" => Some(ItemKey::RecordingDate),
        "track" => Some(ItemKey::TrackNumber),
        "disc" => Some(ItemKey::DiscNumber),
        "comment" => Some(ItemKey::Comment),
        "publisher" => Some(ItemKey::Label),
        "bpm" => Some(ItemKey::IntegerBpm),
        "key" => Some(ItemKey::InitialKey),
        "composer" => Some(ItemKey::Composer),
        "remixer" => Some(ItemKey::Remixer),
        _ => None,
    }
}

/// Name under which `field` is stored natively in `path`'s format.
pub fn native_field_name_for(path: &Path, field: &str) -> String {
    let Some(canonical) = canonical_field(field) else {
        return field.to_string();
    };
    if FRAME_ID_FORMATS.contains(&audio::base_format(path).as_str())
        && let Some((_, frame)) = ID3V2_FRAMES.iter().find(|(f, _)| *f == canonical)
    {
        return (*frame).to_string();
    }
    canonical.to_string()
}

/// Semantic (canonical) name for a possibly native `field`.
pub fn semantic_field_name_for(field: &str) -> String {
    canonical_field(field)
        .map(str::to_string)
        .unwrap_or_else(|| field.to_string())
}

// ---------------------------------------------------------------------------
// Codec interface
// ---------------------------------------------------------------------------

/// Narrow per-file tag interface used by the history engine.
///
/// Writing an empty value deletes the field.
pub trait TagCodec: Send + Sync {
    fn read_field(&self, path: &Path, field: &str) -> Result<Option<String>, TagError>;
    fn write_field(&self, path: &Path, field: &str, value: &str) -> Result<(), TagError>;
    fn delete_field(&self, path: &Path, field: &str) -> Result<(), TagError>;
    fn read_art(&self, path: &Path) -> Result<Option<Vec<u8>>, TagError>;
    fn write_art(&self, path: &Path, data: &[u8]) -> Result<(), TagError>;
    fn remove_art(&self, path: &Path) -> Result<(), TagError>;

    /// Every catalogue field that has a value.
    fn read_fields(&self, path: &Path) -> Result<Vec<(String, String)>, TagError> {
        let mut out = Vec::new();
        for &field in ALL_FIELDS {
            if let Some(value) = self.read_field(path, field)? {
                out.push((field.to_string(), value));
            }
        }
        Ok(out)
    }

    fn native_field_name(&self, path: &Path, field: &str) -> String {
        native_field_name_for(path, field)
    }

    fn semantic_field_name(&self, _path: &Path, field: &str) -> String {
        semantic_field_name_for(field)
    }
}

// ---------------------------------------------------------------------------
// lofty implementation
// ---------------------------------------------------------------------------

/// [`TagCodec`] backed by `lofty`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyCodec;

fn parse_options(read_cover_art: bool) -> ParseOptions {
    ParseOptions::new()
        .read_cover_art(read_cover_art)
        .parsing_mode(ParsingMode::BestAttempt)
}

fn open(path: &Path, read_cover_art: bool) -> Result<TaggedFile, TagError> {
    Probe::open(path)
        .map_err(|e| TagError::Io(format!("Failed to open: {e}")))?
        .options(parse_options(read_cover_art))
        .read()
        .map_err(|e| TagError::Io(format!("Failed to read: {e}")))
}

/// Tag layer we read from and write to. WAV uses ID3v2 (RIFF INFO has no
/// pictures and only a handful of fields).
fn target_tag_type(file: &TaggedFile) -> TagType {
    match file.file_type() {
        FileType::Wav => TagType::Id3v2,
        ft => ft.primary_tag_type(),
    }
}

fn read_tag(file: &TaggedFile) -> Option<&Tag> {
    file.tag(target_tag_type(file))
        .or_else(|| file.primary_tag())
        .or_else(|| file.first_tag())
}

fn catalogue_field(field: &str) -> Option<(&'static str, ItemKey)> {
    canonical_field(field).and_then(|c| field_to_item_key(c).map(|k| (c, k)))
}

/// Handles the split keys: `year` falls back to `Year`, `bpm` to `Bpm`.
fn get_field_from_tag(tag: &Tag, field: &str) -> Option<String> {
    let primary = field_to_item_key(field)?;
    if let Some(val) = tag.get_string(primary) {
        return Some(val.to_string());
    }
    match field {
        "year" => tag.get_string(ItemKey::Year).map(|s| s.to_string()),
        "bpm" => tag.get_string(ItemKey::Bpm).map(|s| s.to_string()),
        _ => None,
    }
}

fn front_cover(tag: &Tag) -> Option<&Picture> {
    tag.pictures()
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| tag.pictures().first())
}

/// Read-modify-write of the target tag layer. `edit` returns whether it
/// changed anything; unchanged tags are not saved. Cover art is always read so
/// existing pictures survive the round-trip.
fn modify_tag(
    path: &Path,
    edit: impl FnOnce(&mut Tag, TagType) -> Result<bool, TagError>,
) -> Result<(), TagError> {
    let mut tagged_file = open(path, true)?;
    let tag_type = target_tag_type(&tagged_file);

    let tag = match tagged_file.tag_mut(tag_type) {
        Some(t) => t,
        None => {
            tagged_file.insert_tag(Tag::new(tag_type));
            tagged_file.tag_mut(tag_type).ok_or_else(|| {
                TagError::Unsupported(format!("File does not support {tag_type:?} tags"))
            })?
        }
    };

    if edit(tag, tag_type)? {
        tag.save_to_path(path, WriteOptions::default())
            .map_err(|e| TagError::Io(format!("Failed to write {tag_type:?} tag: {e}")))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Free-form fields
// ---------------------------------------------------------------------------

/// `mean` of iTunes-style freeform atoms.
const MP4_FREEFORM_MEAN: &str = "com.apple.iTunes";

/// User-defined text fields on a concrete tag format: ID3v2 `TXXX` frames,
/// Vorbis/APE keys and MP4 `----` atoms.
trait FreeformFields {
    fn get_freeform(&self, name: &str) -> Option<String>;
    fn set_freeform(&mut self, name: &str, value: &str) -> Result<(), TagError>;
    /// Returns whether anything was removed.
    fn remove_freeform(&mut self, name: &str) -> bool;
}

impl FreeformFields for Id3v2Tag {
    fn get_freeform(&self, name: &str) -> Option<String> {
        self.get_user_text(name).map(str::to_string)
    }

    fn set_freeform(&mut self, name: &str, value: &str) -> Result<(), TagError> {
        self.insert_user_text(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_freeform(&mut self, name: &str) -> bool {
        self.remove_user_text(name).is_some()
    }
}

/// Vorbis keys are case-insensitive; new keys are written upper-case.
impl FreeformFields for VorbisComments {
    fn get_freeform(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }

    fn set_freeform(&mut self, name: &str, value: &str) -> Result<(), TagError> {
        self.insert(name.to_ascii_uppercase(), value.to_string());
        Ok(())
    }

    fn remove_freeform(&mut self, name: &str) -> bool {
        self.remove(name).count() > 0
    }
}

fn freeform_atom_ident(name: &str) -> AtomIdent<'static> {
    AtomIdent::Freeform {
        mean: Cow::Borrowed(MP4_FREEFORM_MEAN),
        name: Cow::Owned(name.to_string()),
    }
}

impl FreeformFields for Ilst {
    fn get_freeform(&self, name: &str) -> Option<String> {
        self.get(&freeform_atom_ident(name))?
            .data()
            .find_map(|d| match d {
                AtomData::UTF8(s) => Some(s.clone()),
                _ => None,
            })
    }

    fn set_freeform(&mut self, name: &str, value: &str) -> Result<(), TagError> {
        // `insert` merges with an existing atom, so drop it first.
        self.remove_freeform(name);
        self.insert(Atom::new(
            freeform_atom_ident(name),
            AtomData::UTF8(value.to_string()),
        ));
        Ok(())
    }

    fn remove_freeform(&mut self, name: &str) -> bool {
        self.remove(&freeform_atom_ident(name)).count() > 0
    }
}

impl FreeformFields for ApeTag {
    fn get_freeform(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|item| item.value().text())
            .map(str::to_string)
    }

    fn set_freeform(&mut self, name: &str, value: &str) -> Result<(), TagError> {
        let item = ApeItem::new(name.to_string(), ItemValue::Text(value.to_string()))
            .map_err(|e| TagError::Validation(format!("Invalid APE key \"{name}\": {e}")))?;
        self.insert(item);
        Ok(())
    }

    fn remove_freeform(&mut self, name: &str) -> bool {
        let present = self.get(name).is_some();
        self.remove(name);
        present
    }
}

const FREEFORM_FORMATS: &[&str] = &["mp3", "wav", "flac", "ogg", "opus", "m4a", "m4b", "wv"];

fn no_freeform_support(format: &str) -> TagError {
    TagError::Unsupported(format!("{format} files do not support custom fields"))
}

/// A file opened through its concrete lofty type, so format-specific tags
/// (and everything else in the file) survive a save.
enum FreeformFile {
    Mpeg(MpegFile),
    Wav(WavFile),
    Flac(FlacFile),
    Vorbis(VorbisFile),
    Opus(OpusFile),
    Mp4(Mp4File),
    WavPack(WavPackFile),
}

impl FreeformFile {
    fn open(path: &Path) -> Result<Self, TagError> {
        let format = audio::base_format(path);
        if !FREEFORM_FORMATS.contains(&format.as_str()) {
            return Err(no_freeform_support(&format));
        }
        let mut reader =
            File::open(path).map_err(|e| TagError::Io(format!("Failed to open: {e}")))?;
        let options = parse_options(true);
        let read_err = |e: lofty::error::LoftyError| TagError::Io(format!("Failed to read: {e}"));
        Ok(match format.as_str() {
            "mp3" => Self::Mpeg(MpegFile::read_from(&mut reader, options).map_err(read_err)?),
            "wav" => Self::Wav(WavFile::read_from(&mut reader, options).map_err(read_err)?),
            "flac" => Self::Flac(FlacFile::read_from(&mut reader, options).map_err(read_err)?),
            "ogg" => Self::Vorbis(VorbisFile::read_from(&mut reader, options).map_err(read_err)?),
            "opus" => Self::Opus(OpusFile::read_from(&mut reader, options).map_err(read_err)?),
            "m4a" | "m4b" => Self::Mp4(Mp4File::read_from(&mut reader, options).map_err(read_err)?),
            "wv" => Self::WavPack(WavPackFile::read_from(&mut reader, options).map_err(read_err)?),
            other => return Err(no_freeform_support(other)),
        })
    }

    /// Run `edit` against the file's free-form tag layer, creating an empty
    /// tag when the file has none.
    fn with_fields<R>(&mut self, edit: impl FnOnce(&mut dyn FreeformFields) -> R) -> R {
        match self {
            Self::Mpeg(f) => {
                let mut tag = f.remove_id3v2().unwrap_or_default();
                let out = edit(&mut tag);
                f.set_id3v2(tag);
                out
            }
            Self::Wav(f) => {
                let mut tag = f.remove_id3v2().unwrap_or_default();
                let out = edit(&mut tag);
                f.set_id3v2(tag);
                out
            }
            Self::Flac(f) => {
                let mut tag = f.remove_vorbis_comments().unwrap_or_default();
                let out = edit(&mut tag);
                f.set_vorbis_comments(tag);
                out
            }
            Self::Vorbis(f) => edit(f.vorbis_comments_mut()),
            Self::Opus(f) => edit(f.vorbis_comments_mut()),
            Self::Mp4(f) => {
                let mut tag = f.remove_ilst().unwrap_or_default();
                let out = edit(&mut tag);
                f.set_ilst(tag);
                out
            }
            Self::WavPack(f) => {
                let mut tag = f.remove_ape().unwrap_or_default();
                let out = edit(&mut tag);
                f.set_ape(tag);
                out
            }
        }
    }

    fn save(&self, path: &Path) -> Result<(), TagError> {
        let options = WriteOptions::default();
        match self {
            Self::Mpeg(f) => f.save_to_path(path, options),
            Self::Wav(f) => f.save_to_path(path, options),
            Self::Flac(f) => f.save_to_path(path, options),
            Self::Vorbis(f) => f.save_to_path(path, options),
            Self::Opus(f) => f.save_to_path(path, options),
            Self::Mp4(f) => f.save_to_path(path, options),
            Self::WavPack(f) => f.save_to_path(path, options),
        }
        .map_err(|e| TagError::Io(format!("Failed to write custom field: {e}")))
    }
}

fn freeform_name(field: &str) -> Result<&str, TagError> {
    let name = field.trim();
    if name.is_empty() {
        return Err(TagError::Validation("Field name is empty".to_string()));
    }
    Ok(name)
}

fn read_freeform(path: &Path, field: &str) -> Result<Option<String>, TagError> {
    let name = freeform_name(field)?;
    let mut file = FreeformFile::open(path)?;
    Ok(file.with_fields(|tag| tag.get_freeform(name)))
}

fn write_freeform(path: &Path, field: &str, value: &str) -> Result<(), TagError> {
    let name = freeform_name(field)?;
    let mut file = FreeformFile::open(path)?;
    let changed = file.with_fields(|tag| {
        if tag.get_freeform(name).as_deref() == Some(value) {
            return Ok(false);
        }
        tag.set_freeform(name, value).map(|()| true)
    })?;
    if changed {
        file.save(path)?;
    }
    Ok(())
}

fn delete_freeform(path: &Path, field: &str) -> Result<(), TagError> {
    let name = freeform_name(field)?;
    let mut file = FreeformFile::open(path)?;
    if file.with_fields(|tag| tag.remove_freeform(name)) {
        file.save(path)?;
    }
    Ok(())
}

impl TagCodec for LoftyCodec {
    fn read_field(&self, path: &Path, field: &str) -> Result<Option<String>, TagError> {
        let Some((canonical, _)) = catalogue_field(field) else {
            return read_freeform(path, field);
        };
        let tagged_file = open(path, false)?;
        Ok(read_tag(&tagged_file).and_then(|t| get_field_from_tag(t, canonical)))
    }

    fn read_fields(&self, path: &Path) -> Result<Vec<(String, String)>, TagError> {
        let tagged_file = open(path, false)?;
        let Some(tag) = read_tag(&tagged_file) else {
            return Ok(Vec::new());
        };
        Ok(ALL_FIELDS
            .iter()
            .filter_map(|&f| get_field_from_tag(tag, f).map(|v| (f.to_string(), v)))
            .collect())
    }

    fn write_field(&self, path: &Path, field: &str, value: &str) -> Result<(), TagError> {
        if value.is_empty() {
            return self.delete_field(path, field);
        }
        let Some((canonical, key)) = catalogue_field(field) else {
            return write_freeform(path, field, value);
        };
        modify_tag(path, |tag, tag_type| {
            if get_field_from_tag(tag, canonical).as_deref() == Some(value) {
                return Ok(false);
            }
            tag.insert_text(key, value.to_string());
            // Vorbis Comments use DATE and BPM directly; secondary keys would
            // create duplicate fields there.
            if tag_type != TagType::VorbisComments {
                match canonical {
                    "year" => {
                        tag.insert_text(ItemKey::Year, value.to_string());
                    }
                    "bpm" => {
                        tag.insert_text(ItemKey::Bpm, value.to_string());
                    }
                    _ => {}
                }
            }
            Ok(true)
        })
    }

    fn delete_field(&self, path: &Path, field: &str) -> Result<(), TagError> {
        let Some((canonical, key)) = catalogue_field(field) else {
            return delete_freeform(path, field);
        };
        modify_tag(path, |tag, _| {
            if get_field_from_tag(tag, canonical).is_none() {
                return Ok(false);
            }
            tag.remove_key(key);
            match canonical {
                "year" => tag.remove_key(ItemKey::Year),
                "bpm" => tag.remove_key(ItemKey::Bpm),
                _ => {}
            }
            Ok(true)
        })
    }

    fn read_art(&self, path: &Path) -> Result<Option<Vec<u8>>, TagError> {
        let tagged_file = open(path, true)?;
        Ok(read_tag(&tagged_file)
            .and_then(front_cover)
            .map(|p| p.data().to_vec()))
    }

    fn write_art(&self, path: &Path, data: &[u8]) -> Result<(), TagError> {
        let format = audio::base_format(path);
        if audio::NO_EMBEDDED_ART.contains(&format.as_str()) {
            return Err(TagError::Unsupported(format!(
                "{format} files do not support embedded album art"
            )));
        }

        let mut cursor = std::io::Cursor::new(data);
        let detected = Picture::from_reader(&mut cursor)
            .map_err(|e| TagError::Io(format!("Failed to parse image: {e}")))?;
        let mut builder = Picture::unchecked(data.to_vec()).pic_type(PictureType::CoverFront);
        if let Some(mime) = detected.mime_type() {
            builder = builder.mime_type(mime.clone());
        }
        let picture = builder.build();

        modify_tag(path, |tag, _| {
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(picture);
            Ok(true)
        })
    }

    fn remove_art(&self, path: &Path) -> Result<(), TagError> {
        modify_tag(path, |tag, _| {
            let types: Vec<PictureType> = tag.pictures().iter().map(|p| p.pic_type()).collect();
            if types.is_empty() {
                return Ok(false);
            }
            for pic_type in types {
                tag.remove_picture_type(pic_type);
            }
            Ok(true)
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory codec for tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_field_folds_case_and_aliases() {
        assert_eq!(canonical_field("TITLE"), Some("title"));
        assert_eq!(canonical_field("AlbumArtist"), Some("album_artist"));
        assert_eq!(canonical_field("date"), Some("year"));
        assert_eq!(canonical_field("TIT2"), Some("title"));
        assert_eq!(canonical_field("tpe1"), Some("artist"));
        assert_eq!(canonical_field("mood"), None);
    }

    #[test]
    fn every_catalogue_field_has_key_and_frame() {
        for &field in ALL_FIELDS {
            assert!(field_to_item_key(field).is_some(), "no ItemKey for {field}");
            assert!(
                ID3V2_FRAMES.iter().any(|(f, _)| *f == field),
                "no frame id for {field}"
            );
        }
    }

    #[test]
    fn native_names_use_frame_ids_for_id3_formats() {
        assert_eq!(native_field_name_for(Path::new("/m/a.mp3"), "title"), "TIT2");
        assert_eq!(native_field_name_for(Path::new("/m/a.WAV"), "Artist"), "TPE1");
        assert_eq!(native_field_name_for(Path::new("/m/a.flac"), "TITLE"), "title");
        assert_eq!(native_field_name_for(Path::new("/m/a.mp3"), "mood"), "mood");
    }

    #[test]
    fn semantic_names_reverse_frame_ids() {
        assert_eq!(semantic_field_name_for("TIT2"), "title");
        assert_eq!(semantic_field_name_for("TDRC"), "year");
        assert_eq!(semantic_field_name_for("mood"), "mood");
    }

    /// Smallest FLAC lofty accepts: the magic plus a lone STREAMINFO block
    /// (44.1 kHz, stereo, 16 bit, no samples).
    fn write_minimal_flac(path: &Path) {
        let mut bytes = b"fLaC".to_vec();
        bytes.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
        bytes.extend_from_slice(&[0x10, 0x00, 0x10, 0x00]);
        bytes.extend_from_slice(&[0x00; 6]);
        bytes.extend_from_slice(&[0x0A, 0xC4, 0x42, 0xF0]);
        bytes.extend_from_slice(&[0x00; 4]);
        bytes.extend_from_slice(&[0x00; 16]);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn custom_fields_round_trip_on_flac() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flac");
        write_minimal_flac(&path);

        LoftyCodec.write_field(&path, "title", "Alice").unwrap();
        LoftyCodec.write_field(&path, "mood", "calm").unwrap();
        LoftyCodec.write_field(&path, "My Field_2", "x").unwrap();

        assert_eq!(LoftyCodec.read_field(&path, "mood").unwrap().as_deref(), Some("calm"));
        assert_eq!(LoftyCodec.read_field(&path, "MOOD").unwrap().as_deref(), Some("calm"));
        assert_eq!(LoftyCodec.read_field(&path, "title").unwrap().as_deref(), Some("Alice"));

        LoftyCodec.delete_field(&path, "mood").unwrap();
        assert_eq!(LoftyCodec.read_field(&path, "mood").unwrap(), None);
        assert_eq!(
            LoftyCodec.read_field(&path, "My Field_2").unwrap().as_deref(),
            Some("x")
        );
        assert_eq!(LoftyCodec.read_field(&path, "title").unwrap().as_deref(), Some("Alice"));
    }

    #[test]
    fn empty_write_deletes_custom_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flac");
        write_minimal_flac(&path);

        LoftyCodec.write_field(&path, "mood", "calm").unwrap();
        LoftyCodec.write_field(&path, "mood", "").unwrap();
        assert_eq!(LoftyCodec.read_field(&path, "mood").unwrap(), None);
    }

    #[test]
    fn custom_field_name_must_not_be_blank() {
        let err = LoftyCodec
            .read_field(Path::new("/nonexistent.flac"), "  ")
            .unwrap_err();
        assert!(matches!(err, TagError::Validation(_)));
    }

    #[test]
    fn custom_fields_unsupported_for_wma() {
        let err = LoftyCodec
            .write_field(Path::new("/m/a.wma"), "mood", "calm")
            .unwrap_err();
        assert!(matches!(err, TagError::Unsupported(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoftyCodec
            .write_field(&dir.path().join("gone.mp3"), "title", "x")
            .unwrap_err();
        assert!(matches!(err, TagError::Io(_)));
    }

    #[test]
    fn art_rejected_for_formats_without_pictures() {
        let err = LoftyCodec
            .write_art(Path::new("/m/a.wav"), b"\xff\xd8\xff")
            .unwrap_err();
        assert!(matches!(err, TagError::Unsupported(_)));
    }

    #[test]
    fn memory_codec_round_trip() {
        use testing::MemoryCodec;
        let codec = MemoryCodec::new();
        let p = Path::new("/m/a.mp3");
        codec.write_field(p, "TIT2", "Alice").unwrap();
        assert_eq!(codec.read_field(p, "title").unwrap().as_deref(), Some("Alice"));
        codec.write_field(p, "title", "").unwrap();
        assert_eq!(codec.read_field(p, "title").unwrap(), None);

        codec.fail_on("/m/a.mp3");
        assert!(codec.write_field(p, "title", "x").is_err());
    }
}
