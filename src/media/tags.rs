//! Tag and cover embedding via lofty.
//!
//! Uses lofty to write:
//! - ID3v2 tags (MP3, WAV)
//! - MP4 atoms (M4A/AAC)
//! - Vorbis comments (OGG/Opus)

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::picture::{Picture, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag, TagExt};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{TagData, Tagger};
use crate::error::{Error, Result};

const TAG_CONTAINERS: &[&str] = &["mp3", "m4a", "ogg", "wav"];
const COVER_CONTAINERS: &[&str] = &["mp3", "m4a", "ogg"];

/// Tagger backed by lofty. Blocking; call from `spawn_blocking`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagger;

impl LoftyTagger {
    pub fn new() -> Self {
        Self
    }
}

fn check_container(path: &Path, allowed: &[&str], what: &str) -> Result<()> {
    if !path.exists() {
        return Err(Error::missing_file(path));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !allowed.contains(&ext.as_str()) {
        return Err(Error::validation(format!(
            "{what} not supported for '.{ext}' files ({})",
            path.display()
        )));
    }
    Ok(())
}

fn lofty_error(path: &Path, e: lofty::error::LoftyError) -> Error {
    Error::validation(format!("{}: {e}", path.display()))
}

/// Open `path`, let `edit` change its primary tag, and save.
fn edit_primary_tag(path: &Path, edit: impl FnOnce(&mut Tag) -> Result<()>) -> Result<()> {
    let mut tagged_file = Probe::open(path)
        .map_err(|e| lofty_error(path, e))?
        .read()
        .map_err(|e| lofty_error(path, e))?;

    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| Error::validation(format!("{} cannot hold tags", path.display())))?;

    edit(tag)?;

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| lofty_error(path, e))
}

impl Tagger for LoftyTagger {
    fn write_tags(&self, path: &Path, tags: &TagData) -> Result<()> {
        check_container(path, TAG_CONTAINERS, "tags")?;
        edit_primary_tag(path, |tag| {
            tag.set_title(tags.title.clone());
            tag.set_artist(tags.artists.join(", "));
            tag.set_album(tags.album.clone());
            if let Some(year) = tags.release_year.and_then(|y| u32::try_from(y).ok()) {
                tag.set_year(year);
            }
            Ok(())
        })
    }

    fn embed_cover(&self, path: &Path, cover: &Path) -> Result<()> {
        check_container(path, COVER_CONTAINERS, "cover art")?;
        let file = File::open(cover).map_err(|_| Error::missing_file(cover))?;
        let mut picture = Picture::from_reader(&mut BufReader::new(file))
            .map_err(|e| lofty_error(cover, e))?;
        picture.set_pic_type(PictureType::CoverFront);

        edit_primary_tag(path, |tag| {
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(picture);
            Ok(())
        })
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        if !path.exists() {
            return Err(Error::missing_file(path));
        }
        let tagged_file = Probe::open(path)
            .map_err(|e| lofty_error(path, e))?
            .read()
            .map_err(|e| lofty_error(path, e))?;

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Ok(None);
        };

        // Prefer front cover, fall back to first picture
        let pictures = tag.pictures();
        let picture = pictures
            .iter()
            .find(|p| p.pic_type() == PictureType::CoverFront)
            .or_else(|| pictures.first());

        Ok(picture.map(|p| p.data().to_vec()))
    }
}
