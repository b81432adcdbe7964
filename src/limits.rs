/// Widest window a single view may cover.
pub const MAX_WINDOW_DAYS: u32 = 366;

/// Equipment lines rendered in one grid.
pub const MAX_LINES_PER_VIEW: usize = 10_000;

pub const MAX_COMMENT_LEN: usize = 2_000;
pub const MAX_NOTE_LEN: usize = 4_000;
pub const MAX_ACTOR_LEN: usize = 256;

/// Change-notification broadcast buffer per collection.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;
