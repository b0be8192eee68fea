//! Media-manifest consumption. Upload handling, transcoding and storage
//! placement belong to an external collaborator; all the core receives is
//! a final base URL plus the list of produced variant files, from which it
//! builds the per-resolution attachment map.

use parley_types::api::MediaFile;
use parley_types::models::{Attachment, ResolutionUrls, Sensitivity, UrlMap};

/// Resolution tag encoded in a produced filename ("photo_360p.webp" ->
/// "360p"); files without one land under "original".
pub fn resolution_of(filename: &str) -> &str {
    let stem = filename.rsplit_once('.').map_or(filename, |(stem, _)| stem);
    if let Some((_, tag)) = stem.rsplit_once('_') {
        let digits = &tag[..tag.len().saturating_sub(1)];
        if tag.ends_with('p') && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return &stem[stem.len() - tag.len()..];
        }
    }
    "original"
}

/// Build the per-resolution URL map for a manifest. Files in `media*`
/// fields accumulate into lists (multi-image messages); anything else
/// (covers, backgrounds) keeps a single URL per resolution.
pub fn url_map(base_url: &str, files: &[MediaFile]) -> UrlMap {
    let base = base_url.trim_end_matches('/');
    let mut map = UrlMap::new();

    for file in files {
        let resolution = resolution_of(&file.filename).to_string();
        let url = format!("{}/{}/{}", base, file.field, file.filename);

        if file.field.starts_with("media") {
            let slot = map
                .entry(resolution)
                .or_insert_with(|| ResolutionUrls::Many(vec![]));
            match slot {
                ResolutionUrls::Many(urls) => urls.push(url),
                ResolutionUrls::One(_) => *slot = ResolutionUrls::Many(vec![url]),
            }
        } else {
            map.insert(resolution, ResolutionUrls::One(url));
        }
    }

    map
}

/// The attachment for a collaborator-produced media message.
pub fn media_attachment(base_url: &str, files: &[MediaFile], sensitivity: Sensitivity) -> Attachment {
    Attachment::Image {
        url: url_map(base_url, files),
        sensitivity,
    }
}
