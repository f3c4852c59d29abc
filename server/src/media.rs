//! Media probing for file records: mime classification, pixel dimensions,
//! video duration, and embedded metadata.
//!
//! Probes read only headers and never hold files open across awaits; all
//! callers run on blocking threads.

use std::io::{BufReader, Cursor, Read};

use crate::paths::VPath;

/// Everything a probe can learn about a file. Fields a format does not
/// supply stay empty rather than null.
#[derive(Clone, Debug, Default)]
pub struct MediaInfo {
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub title: String,
    pub author: String,
    pub comment: String,
    /// Space-joined.
    pub tags: String,
    pub animation: bool,
}

/// Mime type for a filename, by extension.
pub fn mime_from_name(name: &str) -> String {
    mime_guess::from_path(name).first_or_octet_stream().essence_str().to_string()
}

pub fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

pub fn is_video_mime(mime: &str) -> bool {
    mime.starts_with("video/")
}

/// True when a member name looks like a numbered animation frame
/// (`000000.jpg` and friends).
fn is_frame_name(name: &str) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else { return false };
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "gif")
}

/// Sniff whether a `.zip` is an animation archive: its first member is a
/// numbered frame image. Plain archives stay directories.
pub fn is_animation_zip(path: &VPath) -> bool {
    let Some(container) = (match path {
        VPath::Fs(p) => Some(p),
        VPath::Zip(_) => None,
    }) else {
        return false;
    };
    if path.suffix().as_deref() != Some("zip") {
        return false;
    }

    let Ok(file) = std::fs::File::open(container) else { return false };
    let Ok(mut archive) = zip::ZipArchive::new(file) else { return false };
    if archive.len() == 0 {
        return false;
    }
    let result = match archive.by_index(0) {
        Ok(entry) => is_frame_name(entry.name()),
        Err(_) => false,
    };
    result
}

/// Probe a file for everything the index stores about it.
pub fn probe(path: &VPath) -> MediaInfo {
    let name = path.name();
    let mut info = MediaInfo {
        mime_type: mime_from_name(&name),
        title: name.clone(),
        ..MediaInfo::default()
    };

    if name.to_ascii_lowercase().ends_with(".zip") && is_animation_zip(path) {
        info.mime_type = "video/mjpeg".to_string();
        info.animation = true;
        probe_animation_dimensions(path, &mut info);
        return info;
    }

    if is_image_mime(&info.mime_type) {
        probe_image(path, &mut info);
    } else if is_video_mime(&info.mime_type) {
        probe_video(path, &mut info);
    }

    info
}

fn probe_image(path: &VPath, info: &mut MediaInfo) {
    match path {
        VPath::Fs(p) => {
            if let Ok((w, h)) = image::image_dimensions(p) {
                info.width = Some(w);
                info.height = Some(h);
            }
        }
        VPath::Zip(_) => {
            if let Some((w, h)) = read_dimensions(path) {
                info.width = Some(w);
                info.height = Some(h);
            }
        }
    }

    read_exif(path, info);
}

/// Header-only dimension read from the path's byte stream.
fn read_dimensions(path: &VPath) -> Option<(u32, u32)> {
    let mut reader = path.open().ok()?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).ok()?;
    image::ImageReader::new(Cursor::new(buf)).with_guessed_format().ok()?.into_dimensions().ok()
}

/// Pull title/author/comment out of EXIF where present. Dimensions don't
/// come from EXIF; the decoder already read them.
fn read_exif(path: &VPath, info: &mut MediaInfo) {
    let Ok(mut stream) = path.open() else { return };
    let mut buf = Vec::new();
    if stream.read_to_end(&mut buf).is_err() {
        return;
    }
    let mut cursor = BufReader::new(Cursor::new(buf));
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else { return };

    if let Some(desc) = ascii_field(&exif, exif::Tag::ImageDescription) {
        info.comment = desc;
    }
    if let Some(artist) = ascii_field(&exif, exif::Tag::Artist) {
        info.author = artist;
    }
}

fn ascii_field(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Ascii(values) => {
            let raw = values.first()?;
            let text = String::from_utf8_lossy(raw).trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        _ => None,
    }
}

/// MP4-family probing: duration plus the first video track's dimensions.
/// Other video containers keep whatever stat gave us.
fn probe_video(path: &VPath, info: &mut MediaInfo) {
    if !matches!(path.suffix().as_deref(), Some("mp4" | "m4v" | "mov")) {
        return;
    }
    let VPath::Fs(p) = path else { return };

    let Ok(file) = std::fs::File::open(p) else { return };
    let Ok(meta) = file.metadata() else { return };
    let reader = BufReader::new(file);
    let Ok(mp4) = mp4::Mp4Reader::read_header(reader, meta.len()) else { return };

    let duration = mp4.duration().as_secs_f64();
    if duration > 0.0 {
        info.duration = Some(duration);
    }
    for track in mp4.tracks().values() {
        if matches!(track.track_type(), Ok(mp4::TrackType::Video)) {
            info.width = Some(track.width() as u32);
            info.height = Some(track.height() as u32);
            break;
        }
    }
}

/// An animation's dimensions are its first frame's.
fn probe_animation_dimensions(path: &VPath, info: &mut MediaInfo) {
    let Ok(members) = path.iterdir() else { return };
    let Some(first) = members.first() else { return };
    if let Some((w, h)) = read_dimensions(first) {
        info.width = Some(w);
        info.height = Some(h);
    }
}
