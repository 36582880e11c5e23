//! Download path-remap table loaders
//!
//! The table maps short, stable request paths to the real artifact paths on
//! the mirrors. Two formats are supported: a pipe-separated CSV of
//! `source|destination` rows, and the release-file JSON feed, where each
//! asset expands into one or more keys.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Extensions whose no-extension key also maps to the artifact. `img.xz` is
/// always treated this way; deployments can extend the list.
const ALWAYS_SPECIAL: &[&str] = &["img.xz"];

/// Suffixes collapsed to their short form in keys
const SHORT_SUFFIXES: &[&str] = &["sha", "asc", "torrent"];

/// A single release asset from the JSON feed
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseFile {
    pub board_slug: String,
    pub file_url: String,
    pub distro_release: String,
    pub kernel_branch: String,
    #[serde(default)]
    pub image_variant: String,
    #[serde(default)]
    pub preinstalled_application: String,
    #[serde(default)]
    pub download_repository: String,
    #[serde(default)]
    pub file_extension: String,
}

/// The JSON feed arrives either wrapped in an `assets` object or as a bare
/// array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MapFile {
    Wrapped { assets: Vec<ReleaseFile> },
    Bare(Vec<ReleaseFile>),
}

/// Load a remap table, dispatching on the file extension
pub fn load(path: &Path) -> Result<HashMap<String, String>> {
    let file = std::fs::File::open(path)?;

    let map = if path.extension().is_some_and(|ext| ext == "json") {
        load_json(file)?
    } else {
        load_csv(BufReader::new(file))?
    };

    tracing::info!(file = %path.display(), entries = map.len(), "Loaded download map");

    Ok(map)
}

/// Load the CSV form: `source|destination`, extra columns ignored, leading
/// slashes stripped from both sides
pub fn load_csv<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for line in reader.lines() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let mut columns = line.split('|');

        let source = columns
            .next()
            .ok_or_else(|| Error::DownloadMap(format!("short row: {line}")))?;
        let destination = columns
            .next()
            .ok_or_else(|| Error::DownloadMap(format!("short row: {line}")))?;

        map.insert(
            source.trim().trim_start_matches('/').to_string(),
            destination.trim().trim_start_matches('/').to_string(),
        );
    }

    Ok(map)
}

/// Load the JSON form with the default special-extension list
pub fn load_json<R: Read>(reader: R) -> Result<HashMap<String, String>> {
    load_json_with_special(reader, &[])
}

/// Load the JSON form, treating the given extensions (plus `img.xz`) as
/// mapping their no-extension key too
pub fn load_json_with_special<R: Read>(
    reader: R,
    special: &[String],
) -> Result<HashMap<String, String>> {
    let parsed: MapFile = serde_json::from_reader(reader)?;

    let assets = match parsed {
        MapFile::Wrapped { assets } => assets,
        MapFile::Bare(assets) => assets,
    };

    let mut map = HashMap::new();

    for asset in &assets {
        let destination = match Url::parse(&asset.file_url) {
            Ok(url) => url.path().to_string(),
            Err(e) => {
                tracing::warn!(url = %asset.file_url, error = %e, "Skipping unparseable file url");
                continue;
            }
        };

        for key in release_keys(asset, special) {
            map.insert(key, destination.clone());
        }
    }

    Ok(map)
}

/// Expand one asset into its lookup keys
fn release_keys(asset: &ReleaseFile, special: &[String]) -> Vec<String> {
    let mut base = String::new();

    if asset.download_repository == "os" {
        base.push_str("nightly/");
    }

    base.push_str(&asset.board_slug);
    base.push('/');
    base.push_str(&title_case(&asset.distro_release));
    base.push('_');
    base.push_str(&asset.kernel_branch);

    if !asset.image_variant.is_empty() {
        base.push('_');
        base.push_str(&asset.image_variant);
    }

    if !asset.preinstalled_application.is_empty() {
        base.push('-');
        base.push_str(&asset.preinstalled_application);
    }

    let extension = asset.file_extension.trim_matches('.');

    if extension.is_empty() {
        return vec![base];
    }

    // A trailing .sha/.asc/.torrent collapses to its short form
    for suffix in SHORT_SUFFIXES {
        if let Some(stem) = extension.strip_suffix(&format!(".{suffix}")) {
            if is_special(stem, special) {
                return vec![format!("{base}.{suffix}")];
            }

            return vec![format!("{base}.{extension}"), format!("{base}.{suffix}")];
        }
    }

    let mut keys = vec![format!("{base}.{extension}")];

    if is_special(extension, special) {
        keys.push(base);
    }

    keys
}

/// Whether an extension's no-extension key should also map
fn is_special(extension: &str, special: &[String]) -> bool {
    ALWAYS_SPECIAL
        .iter()
        .copied()
        .chain(special.iter().map(|s| s.as_str()))
        .any(|s| extension == s || extension.ends_with(&format!(".{s}")))
}

/// `bookworm` -> `Bookworm`
fn title_case(word: &str) -> String {
    let mut chars = word.chars();

    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
