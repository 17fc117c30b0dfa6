/// Named screen resolutions, largest first. Order matters for ties.
pub const SCREEN_RESOLUTIONS: &[(&str, u32, u32)] = &[
    ("8K", 7680, 4320),
    ("5K", 5120, 2880),
    ("Ultrawide 4K", 5120, 2160),
    ("4K", 3840, 2160),
    ("Ultrawide 1440p", 3440, 1440),
    ("1440p", 2560, 1440),
    ("1080p", 1920, 1080),
    ("720p", 1280, 720),
];

/// Picks the largest screen an image of `width` x `height` fills without
/// upscaling. An image covers a resolution when both sides are at least as
/// large. Returns `None` when it covers nothing in the table.
pub fn recommend(width: u32, height: u32) -> Option<&'static str> {
    let mut best: Option<(&'static str, u64)> = None;

    for &(label, req_w, req_h) in SCREEN_RESOLUTIONS {
        if width < req_w || height < req_h {
            continue;
        }
        let area = req_w as u64 * req_h as u64;
        // Strictly greater: on equal area the earlier entry stays.
        if best.map_or(true, |(_, a)| area > a) {
            best = Some((label, area));
        }
    }

    best.map(|(label, _)| label)
}
