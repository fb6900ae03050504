//! Object naming for sources, frames, composites and worker logs.

/// Extension of accepted source files.
pub const SOURCE_EXT: &str = "blend";
/// Extension of rendered frame images.
pub const FRAME_EXT: &str = "png";
/// Extension of the sequenced composite.
pub const COMPOSITE_EXT: &str = "mp4";
/// Extension of per-worker log objects.
pub const LOG_EXT: &str = "csv";

/// File stem of a source name: `scene.blend` -> `scene`.
///
/// Returns `None` when the name lacks the source extension or has an empty stem.
pub fn source_stem(file: &str) -> Option<&str> {
    file.strip_suffix(SOURCE_EXT)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|stem| !stem.is_empty())
}

/// Per-frame artifact name: `<stem><NNNN>.png`.
pub fn frame_name(stem: &str, frame: u32) -> String {
    format!("{stem}{frame:04}.{FRAME_EXT}")
}

/// Final composite name: `<stem>.mp4`.
pub fn composite_name(stem: &str) -> String {
    format!("{stem}.{COMPOSITE_EXT}")
}

/// Source name for a stem: `<stem>.blend`.
pub fn source_name(stem: &str) -> String {
    format!("{stem}.{SOURCE_EXT}")
}

/// Map a composite artifact name back to the source file that produced it.
pub fn source_for_composite(key: &str) -> Option<String> {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.strip_suffix(COMPOSITE_EXT)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|stem| !stem.is_empty())
        .map(source_name)
}

/// Durable log object of a worker.
pub fn worker_log_name(worker_id: &str) -> String {
    format!("{worker_id}.{LOG_EXT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_stem() {
        assert_eq!(source_stem("scene.blend"), Some("scene"));
        assert_eq!(source_stem(".blend"), None);
        assert_eq!(source_stem("scene.mp4"), None);
        assert_eq!(frame_name("scene", 7), "scene0007.png");
        assert_eq!(frame_name("scene", 12345), "scene12345.png");
        assert_eq!(composite_name("scene"), "scene.mp4");
    }

    #[test]
    fn composite_maps_back_to_source() {
        assert_eq!(source_for_composite("scene.mp4").as_deref(), Some("scene.blend"));
        assert_eq!(
            source_for_composite("renders/scene.mp4").as_deref(),
            Some("scene.blend")
        );
        assert_eq!(source_for_composite("scene0001.png"), None);
        assert_eq!(source_for_composite(".mp4"), None);
    }
}
