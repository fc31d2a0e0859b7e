// Picks the slide backend from the file extension.

use std::path::Path;
use std::sync::Arc;

use super::{PyramidOpener, SlideOpener, SlideResult, SlideSource};
#[cfg(not(feature = "openslide"))]
use super::SlideError;

/// Extensions read through openslide: Aperio, Hamamatsu, Leica, MIRAX,
/// Ventana and generic tiled TIFF.
const WHOLE_SLIDE_EXTENSIONS: &[&str] = &[
    "svs", "tif", "tiff", "ndpi", "vms", "vmu", "scn", "mrxs", "bif", "svslide",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    /// Tiled multi-resolution slide.
    WholeSlide,
    /// Plain raster decoded in full by the `image` crate.
    Raster,
}

impl SlideFormat {
    pub fn of(path: &Path) -> Self {
        let is_whole_slide = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                WHOLE_SLIDE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false);

        if is_whole_slide {
            Self::WholeSlide
        } else {
            Self::Raster
        }
    }
}

/// Default opener: whole-slide formats go to openslide (with the `openslide`
/// feature), everything else to [`PyramidOpener`].
#[derive(Debug, Clone, Default)]
pub struct FormatOpener {
    raster: PyramidOpener,
    #[cfg(feature = "openslide")]
    whole_slide: super::OpenSlideOpener,
}

impl FormatOpener {
    pub fn new(raster: PyramidOpener) -> Self {
        Self {
            raster,
            #[cfg(feature = "openslide")]
            whole_slide: super::OpenSlideOpener,
        }
    }

    #[cfg(feature = "openslide")]
    fn open_whole_slide(&self, path: &Path) -> SlideResult<Arc<dyn SlideSource>> {
        self.whole_slide.open(path)
    }

    #[cfg(not(feature = "openslide"))]
    fn open_whole_slide(&self, path: &Path) -> SlideResult<Arc<dyn SlideSource>> {
        // TIFF still decodes as a flat raster.
        let is_tiff = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"));
        if is_tiff {
            return self.raster.open(path);
        }

        Err(SlideError::Open {
            path: path.to_path_buf(),
            reason: "whole-slide formats need the `openslide` feature".to_string(),
        })
    }
}

impl SlideOpener for FormatOpener {
    fn open(&self, path: &Path) -> SlideResult<Arc<dyn SlideSource>> {
        match SlideFormat::of(path) {
            SlideFormat::WholeSlide => self.open_whole_slide(path),
            SlideFormat::Raster => self.raster.open(path),
        }
    }
}
