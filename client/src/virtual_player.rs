use tokio::time::Instant;

use crate::sync_reconciler::PlaybackTransport;

/// Clock-driven stand-in for a media element: tracks where playback would
/// be without rendering any audio.
pub struct VirtualPlayer {
    source: Option<String>,
    anchor_position: f64,
    anchor: Instant,
    playing: bool,
}

impl VirtualPlayer {
    pub fn new() -> Self {
        Self {
            source: None,
            anchor_position: 0.0,
            anchor: Instant::now(),
            playing: false,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Loading rewinds to the start, paused.
    pub fn load(&mut self, source: &str) {
        self.source = Some(source.to_string());
        self.playing = false;
        self.anchor_position = 0.0;
        self.anchor = Instant::now();
    }

    pub fn unload(&mut self) {
        self.source = None;
        self.playing = false;
        self.anchor_position = 0.0;
        self.anchor = Instant::now();
    }

    fn re_anchor(&mut self) {
        self.anchor_position = self.position_seconds();
        self.anchor = Instant::now();
    }
}

impl Default for VirtualPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackTransport for VirtualPlayer {
    fn position_seconds(&self) -> f64 {
        if self.playing {
            self.anchor_position + self.anchor.elapsed().as_secs_f64()
        } else {
            self.anchor_position
        }
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn seek(&mut self, position_seconds: f64) {
        self.anchor_position = position_seconds.max(0.0);
        self.anchor = Instant::now();
    }

    fn play(&mut self) {
        if !self.playing {
            self.re_anchor();
            self.playing = true;
        }
    }

    fn pause(&mut self) {
        if self.playing {
            self.re_anchor();
            self.playing = false;
        }
    }
}
