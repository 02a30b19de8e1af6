use crate::MediaTarget;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while planning output files
#[derive(Debug, Error)]
pub enum FileOperationError {
    /// Two targets of one run would write to the same file
    #[error("Two targets share the output path {0}")]
    DuplicateOutput(PathBuf),
}

/// Container extension of every recording
pub const OUTPUT_EXTENSION: &str = "mkv";

/// Extension appended to the output path while a recording is in progress
pub const PART_EXTENSION: &str = "part";

const TITLE_DIR_FORMAT: &str = "{title} ({year})";
const MOVIE_FILE_FORMAT: &str = "{title} ({year}).{ext}";
const SEASON_DIR_FORMAT: &str = "Season {season:02}";
const EPISODE_FILE_FORMAT: &str = "{title} ({year}) - S{season:02}E{episode:02}.{ext}";

/// Sanitizes a string for use in filenames by replacing problematic characters
///
/// Replaces characters that are invalid or problematic in filenames across platforms:
/// - Path separators: / \
/// - Reserved characters: : * ? " < > |
/// - Control characters
/// - Trim leading/trailing whitespace and dots
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Trim whitespace and dots from start/end
    sanitized.trim_matches(|c: char| c.is_whitespace() || c == '.').to_string()
}

/// Formats a file or directory name from a template
///
/// Supported placeholders:
/// - `{title}` - Movie or show title (sanitized)
/// - `{year}` - Release year (sanitized)
/// - `{season}` or `{season:NN}` - Season number with optional zero-padding
/// - `{episode}` or `{episode:NN}` - Episode number with optional zero-padding
/// - `{ext}` - File extension (without dot)
///
/// # Examples
///
/// ```
/// use tape_deck::format_filename;
///
/// let result = format_filename(
///     "{title} ({year}) - S{season:02}E{episode:02}.{ext}",
///     "Breaking Bad",
///     "2008",
///     Some((1, 2)),
///     "mkv",
/// );
/// assert_eq!(result, "Breaking Bad (2008) - S01E02.mkv");
/// ```
pub fn format_filename(
    format: &str,
    title: &str,
    year: &str,
    numbering: Option<(u32, u32)>,
    extension: &str,
) -> String {
    let mut result = format.to_string();

    result = result.replace("{title}", &sanitize_filename(title));
    result = result.replace("{year}", &sanitize_filename(year));

    if let Some((season, episode)) = numbering {
        result = replace_with_padding(&result, "season", season);
        result = replace_with_padding(&result, "episode", episode);
    }

    result.replace("{ext}", extension)
}

/// Helper function to replace placeholders with optional zero-padding
///
/// Handles both `{name}` and `{name:NN}` where NN is the padding width
fn replace_with_padding(text: &str, name: &str, value: u32) -> String {
    let mut result = text.to_string();

    // First, handle padded versions like {season:02}
    let pattern_start = format!("{{{name}:");
    while let Some(start) = result.find(&pattern_start) {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let full_pattern = result[start..start + end + 1].to_string();
        let padding_str = &full_pattern[pattern_start.len()..full_pattern.len() - 1];

        match padding_str.parse::<usize>() {
            Ok(width) => {
                let formatted = format!("{:0width$}", value, width = width);
                result = result.replace(&full_pattern, &formatted);
            }
            Err(_) => break,
        }
    }

    // Then handle unpadded version like {season}
    let simple_pattern = format!("{{{name}}}");
    result.replace(&simple_pattern, &value.to_string())
}

/// Destination of a movie recording
///
/// `{out}/{Title} ({Year})/{Title} ({Year}).mkv`
pub fn movie_output_path(output_dir: &Path, title: &str, year: &str) -> PathBuf {
    output_dir
        .join(format_filename(TITLE_DIR_FORMAT, title, year, None, OUTPUT_EXTENSION))
        .join(format_filename(MOVIE_FILE_FORMAT, title, year, None, OUTPUT_EXTENSION))
}

/// Destination of an episode recording
///
/// `{out}/{Show} ({Year})/Season {SS}/{Show} ({Year}) - S{SS}E{EE}.mkv`
pub fn episode_output_path(
    output_dir: &Path,
    show: &str,
    year: &str,
    season: u32,
    episode: u32,
) -> PathBuf {
    let numbering = Some((season, episode));
    output_dir
        .join(format_filename(TITLE_DIR_FORMAT, show, year, None, OUTPUT_EXTENSION))
        .join(format_filename(SEASON_DIR_FORMAT, show, year, numbering, OUTPUT_EXTENSION))
        .join(format_filename(EPISODE_FILE_FORMAT, show, year, numbering, OUTPUT_EXTENSION))
}

/// Staging path next to the final output: `<output>.part`
pub fn part_path(output_path: &Path) -> PathBuf {
    let mut name = OsString::from(output_path.as_os_str());
    name.push(".");
    name.push(PART_EXTENSION);
    PathBuf::from(name)
}

/// Ensures no two targets write to the same file
pub fn ensure_unique_outputs(targets: &[MediaTarget]) -> Result<(), FileOperationError> {
    let mut seen = HashSet::with_capacity(targets.len());
    for target in targets {
        if !seen.insert(target.output_path.as_path()) {
            return Err(FileOperationError::DuplicateOutput(
                target.output_path.clone(),
            ));
        }
    }
    Ok(())
}
