//! Light/heavy triage (§4.3 "Triage"): decides whether a candidate file is
//! processed immediately or deferred to the night window.

use std::path::Path;

const LIGHT_PDF_MAX_BYTES: u64 = 2 * 1024 * 1024;
const HEAVY_ANY_MAX_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    Light,
    Heavy,
}

fn extension_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// §4.3: "Light = text, markdown, CSV, small images, PDFs <= 2MB. Heavy =
/// audio, video, PDFs > 2MB, any file > 10MB."
pub fn classify(path: &Path, file_size: u64) -> Weight {
    if file_size > HEAVY_ANY_MAX_BYTES {
        return Weight::Heavy;
    }
    match extension_lower(path).as_str() {
        "txt" | "md" | "csv" | "png" | "jpg" | "jpeg" => Weight::Light,
        "pdf" => {
            if file_size <= LIGHT_PDF_MAX_BYTES {
                Weight::Light
            } else {
                Weight::Heavy
            }
        }
        "mp3" | "wav" | "flac" | "m4a" | "ogg" | "mp4" | "mov" | "avi" | "mkv" | "webm" => {
            Weight::Heavy
        }
        // Unknown extensions default light unless large enough to already
        // have tripped the size check above; an unrecognized small file is
        // still worth trying to extract rather than deferring indefinitely.
        _ => Weight::Light,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn small_pdf_is_light() {
        assert_eq!(classify(&PathBuf::from("a.pdf"), 1024), Weight::Light);
    }

    #[test]
    fn large_pdf_is_heavy() {
        assert_eq!(
            classify(&PathBuf::from("a.pdf"), LIGHT_PDF_MAX_BYTES + 1),
            Weight::Heavy
        );
    }

    #[test]
    fn video_is_always_heavy_even_when_small() {
        assert_eq!(classify(&PathBuf::from("clip.mp4"), 100), Weight::Heavy);
    }

    #[test]
    fn any_file_over_ten_mb_is_heavy() {
        assert_eq!(
            classify(&PathBuf::from("notes.txt"), HEAVY_ANY_MAX_BYTES + 1),
            Weight::Heavy
        );
    }

    #[test]
    fn markdown_is_light() {
        assert_eq!(classify(&PathBuf::from("notes.md"), 500), Weight::Light);
    }
}
