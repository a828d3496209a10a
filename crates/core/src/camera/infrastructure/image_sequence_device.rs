use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::camera::domain::media_device::{
    CameraConstraints, CameraError, FacingMode, MediaDevices, MediaStream,
};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;

/// A user-facing camera double that replays a directory of still images.
///
/// Images are served in file-name order and loop forever. The current image
/// stays on the stream, decoded once, until the stream is advanced, so every
/// reader between two display ticks sees the same frame.
pub struct ImageSequenceDevice {
    dir: PathBuf,
    warmup_reads: usize,
    active_tracks: Arc<AtomicUsize>,
}

impl ImageSequenceDevice {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            warmup_reads: 0,
            active_tracks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of reads that return no frame before the stream is decodable.
    pub fn with_warmup(mut self, reads: usize) -> Self {
        self.warmup_reads = reads;
        self
    }

    /// Tracks still live across every stream this device has opened.
    pub fn active_tracks(&self) -> usize {
        self.active_tracks.load(Ordering::SeqCst)
    }
}

impl MediaDevices for ImageSequenceDevice {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn MediaStream>, CameraError> {
        if constraints.facing_mode != FacingMode::User {
            return Err(CameraError::DeviceUnavailable(format!(
                "no {:?}-facing camera in {}",
                constraints.facing_mode,
                self.dir.display()
            )));
        }

        let paths = list_images(&self.dir)?;
        let dimensions = image::image_dimensions(&paths[0])
            .map_err(|e| CameraError::StreamFailed(format!("{}: {e}", paths[0].display())))?;

        self.active_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ImageSequenceStream {
            paths,
            dimensions,
            cursor: 0,
            current: None,
            shown: false,
            warmup_remaining: self.warmup_reads,
            stopped: false,
            active_tracks: self.active_tracks.clone(),
        }))
    }
}

struct ImageSequenceStream {
    paths: Vec<PathBuf>,
    dimensions: (u32, u32),
    cursor: u64,
    current: Option<Frame>,
    /// The image at `cursor` has been decoded, or failed to decode.
    shown: bool,
    warmup_remaining: usize,
    stopped: bool,
    active_tracks: Arc<AtomicUsize>,
}

impl MediaStream for ImageSequenceStream {
    fn video_dimensions(&self) -> Option<(u32, u32)> {
        (!self.stopped).then_some(self.dimensions)
    }

    fn read_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return None;
        }

        if self.shown {
            return self.current.clone();
        }

        self.shown = true;
        self.current = self.decode_current();
        self.current.clone()
    }

    fn advance(&mut self) {
        if self.shown {
            self.cursor += 1;
            self.current = None;
            self.shown = false;
        }
    }

    fn stop_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.current = None;
            self.active_tracks.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn active_tracks(&self) -> usize {
        usize::from(!self.stopped)
    }
}

impl ImageSequenceStream {
    fn decode_current(&self) -> Option<Frame> {
        let path = &self.paths[(self.cursor % self.paths.len() as u64) as usize];
        let sequence = self.cursor;

        match image::open(path) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                let (w, h) = rgb.dimensions();
                Frame::new(rgb.into_raw(), w, h, 3, sequence)
                    .map_err(|e| log::warn!("Skipping frame {}: {e}", path.display()))
                    .ok()
            }
            Err(e) => {
                log::warn!("Skipping undecodable frame {}: {e}", path.display());
                None
            }
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CameraError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CameraError::DeviceUnavailable(format!("{}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_image(path))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(CameraError::DeviceUnavailable(format!(
            "no images in {}",
            dir.display()
        )));
    }
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
