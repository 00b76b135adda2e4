//! Interactive mask session for one image.
//!
//! The session keeps the uploaded image, the ordered prompt history and one
//! mask per prompt. The composite shown to the user is never patched in
//! place: every operation re-renders it from `(base, masks, prompts)`.

mod cache;
mod store;

pub use cache::MaskCache;
pub use store::{SessionHandle, SessionStore, StoreSettings};

use crate::error::{LocatorError, Result};
use crate::estimate::exif::{self, PhotoMetadata};
use crate::render::{self, OverlayStyle};
use crate::segmentation::selection::{self, ObjectKey};
use crate::segmentation::{ImageEmbedding, Mask, PointPrompt, PromptSegmenter};
use image::RgbImage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Image state after a successful upload
struct LoadedImage {
    base: RgbImage,
    embedding: ImageEmbedding,
    metadata: PhotoMetadata,
    prompts: Vec<PointPrompt>,
    masks: Vec<Mask>,
    /// Object each mask belongs to, paired with `masks`
    keys: Vec<ObjectKey>,
}

enum SessionState {
    NoImage,
    ImageLoaded(LoadedImage),
}

/// A decoded and primed image, not yet installed
pub struct PreparedUpload {
    base: RgbImage,
    embedding: ImageEmbedding,
    metadata: PhotoMetadata,
}

/// Result of `add_point`
#[derive(Debug, Clone)]
pub struct AddPointOutcome {
    pub composite: RgbImage,
    /// The mask appended for this prompt
    pub mask: Mask,
    /// One mask per object touched by this call
    pub objects: Vec<(ObjectKey, Mask)>,
}

pub struct MaskSession {
    segmenter: Arc<dyn PromptSegmenter>,
    style: OverlayStyle,
    cache: Option<MaskCache>,
    state: SessionState,
}

impl MaskSession {
    pub fn new(segmenter: Arc<dyn PromptSegmenter>, style: OverlayStyle) -> Self {
        Self {
            segmenter,
            style,
            cache: None,
            state: SessionState::NoImage,
        }
    }

    pub fn with_cache(mut self, cache: MaskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn loaded(&self) -> Result<&LoadedImage> {
        match &self.state {
            SessionState::ImageLoaded(loaded) => Ok(loaded),
            SessionState::NoImage => Err(LocatorError::InvalidState("upload an image first")),
        }
    }

    fn loaded_mut(&mut self) -> Result<&mut LoadedImage> {
        match &mut self.state {
            SessionState::ImageLoaded(loaded) => Ok(loaded),
            SessionState::NoImage => Err(LocatorError::InvalidState("upload an image first")),
        }
    }

    pub fn prompts(&self) -> &[PointPrompt] {
        match &self.state {
            SessionState::ImageLoaded(loaded) => &loaded.prompts,
            SessionState::NoImage => &[],
        }
    }

    pub fn masks(&self) -> &[Mask] {
        match &self.state {
            SessionState::ImageLoaded(loaded) => &loaded.masks,
            SessionState::NoImage => &[],
        }
    }

    pub fn base_image(&self) -> Result<&RgbImage> {
        Ok(&self.loaded()?.base)
    }

    pub fn metadata(&self) -> Result<&PhotoMetadata> {
        Ok(&self.loaded()?.metadata)
    }

    /// Current segmentation: union of the newest mask of each object
    ///
    /// Older masks of an object are superseded by its refinements, so a
    /// background click shrinks the result. Empty when nothing was clicked.
    pub fn current_mask(&self) -> Result<Mask> {
        let loaded = self.loaded()?;
        let (width, height) = loaded.base.dimensions();
        let mut latest: BTreeMap<ObjectKey, &Mask> = BTreeMap::new();
        for (key, mask) in loaded.keys.iter().zip(&loaded.masks) {
            latest.insert(*key, mask);
        }
        Ok(latest
            .values()
            .fold(Mask::empty(width, height), |acc, m| acc.union(m)))
    }

    /// Decode and prime an image without touching the current state
    pub fn prepare_upload(&self, bytes: &[u8]) -> Result<PreparedUpload> {
        let base = render::decode_image(bytes)?;
        let metadata = exif::read_metadata(bytes);
        self.prepare_image(base, metadata)
    }

    pub fn prepare_image(&self, base: RgbImage, metadata: PhotoMetadata) -> Result<PreparedUpload> {
        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(LocatorError::Decode("image has no pixels".to_string()));
        }

        tracing::info!("Priming {} on {}x{} image", self.segmenter.name(), width, height);
        let embedding = self
            .segmenter
            .prime(&base)
            .map_err(|e| LocatorError::collaborator("segmentation", e))?;

        Ok(PreparedUpload {
            base,
            embedding,
            metadata,
        })
    }

    /// Replace the image and reset the history; returns the base image
    pub fn install(&mut self, prepared: PreparedUpload) -> RgbImage {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear() {
                tracing::warn!("Failed to clear mask cache: {:#}", e);
            }
        }

        let composite = prepared.base.clone();
        self.state = SessionState::ImageLoaded(LoadedImage {
            base: prepared.base,
            embedding: prepared.embedding,
            metadata: prepared.metadata,
            prompts: Vec::new(),
            masks: Vec::new(),
            keys: Vec::new(),
        });
        composite
    }

    /// Decode, prime and install an uploaded byte stream
    pub fn upload(&mut self, bytes: &[u8]) -> Result<RgbImage> {
        let prepared = self.prepare_upload(bytes)?;
        Ok(self.install(prepared))
    }

    /// Append a prompt and its mask, then re-render
    ///
    /// Nothing is appended unless the mask was produced.
    pub fn add_point(&mut self, prompt: PointPrompt, multi_object: bool) -> Result<AddPointOutcome> {
        let loaded = self.loaded()?;
        let (width, height) = loaded.base.dimensions();
        if prompt.x >= width || prompt.y >= height {
            return Err(LocatorError::InvalidPrompt(format!(
                "({}, {}) is outside the {}x{} image",
                prompt.x, prompt.y, width, height
            )));
        }

        let index = loaded.prompts.len();
        let mut history = loaded.prompts.clone();
        history.push(prompt);

        let new_key = ObjectKey::of(&prompt, index, multi_object);
        let mut groups: BTreeMap<ObjectKey, Vec<usize>> = BTreeMap::new();
        for (i, p) in history.iter().enumerate() {
            let key = ObjectKey::of(p, i, multi_object);
            // Single-object mode only decodes the new prompt's object
            if multi_object || key == new_key {
                groups.entry(key).or_default().push(i);
            }
        }

        let decode: Vec<usize> = groups.values().flatten().copied().collect();
        let points: Vec<(u32, u32)> = decode.iter().map(|&i| (history[i].x, history[i].y)).collect();
        let labels: Vec<_> = decode.iter().map(|&i| history[i].label).collect();

        let candidates = self
            .segmenter
            .predict(&loaded.embedding, &points, &labels, true)
            .map_err(|e| LocatorError::collaborator("segmentation", e))?;
        if candidates.len() != points.len() {
            return Err(LocatorError::Collaborator {
                collaborator: "segmentation",
                message: format!("{} candidate lists for {} points", candidates.len(), points.len()),
            });
        }
        if let Some(found) = candidates
            .iter()
            .flatten()
            .map(|c| c.mask.dimensions())
            .find(|&dims| dims != (width, height))
        {
            return Err(LocatorError::Collaborator {
                collaborator: "segmentation",
                message: format!(
                    "{}x{} mask for a {}x{} image",
                    found.0, found.1, width, height
                ),
            });
        }

        let mut objects = Vec::with_capacity(groups.len());
        let mut offset = 0;
        for (key, members) in &groups {
            let span = offset..offset + members.len();
            offset += members.len();
            let mask = selection::object_mask(*key, width, height, &labels[span.clone()], &candidates[span]);
            objects.push((*key, mask));
        }

        let mask = objects
            .iter()
            .find(|(key, _)| *key == new_key)
            .map(|(_, mask)| mask.clone())
            .unwrap_or_else(|| Mask::empty(width, height));

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(index, &mask) {
                tracing::warn!("Failed to cache mask {}: {:#}", index, e);
            }
        }

        let loaded = self.loaded_mut()?;
        loaded.prompts.push(prompt);
        loaded.masks.push(mask.clone());
        loaded.keys.push(new_key);
        tracing::debug!(
            "Added {:?} prompt at ({}, {}); {} prompts, {} masks",
            prompt.label,
            prompt.x,
            prompt.y,
            loaded.prompts.len(),
            loaded.masks.len()
        );

        Ok(AddPointOutcome {
            composite: self.composite()?,
            mask,
            objects,
        })
    }

    /// Remove the newest prompt and its mask, then re-render from scratch
    pub fn undo(&mut self) -> Result<RgbImage> {
        let loaded = self.loaded_mut()?;
        if loaded.prompts.is_empty() {
            return Err(LocatorError::EmptyHistory);
        }

        loaded.prompts.pop();
        loaded.masks.pop();
        loaded.keys.pop();
        let index = loaded.masks.len();

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(index) {
                tracing::warn!("Failed to drop cached mask {}: {:#}", index, e);
            }
        }

        self.composite()
    }

    /// Current composite: base image + masks in order + markers
    pub fn composite(&self) -> Result<RgbImage> {
        let loaded = self.loaded()?;
        Ok(render::compose(
            &loaded.base,
            &loaded.masks,
            &loaded.prompts,
            &self.style,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::segmentation::{PointLabel, ScoredMask};
    use anyhow::Result as AnyResult;
    use image::{DynamicImage, Rgb};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Paints a disc of fixed radius around each point; a second, smaller
    /// candidate scores lower so arg-max selection is exercised.
    pub(crate) struct DiscSegmenter {
        pub radius: u32,
        pub primes: AtomicUsize,
    }

    impl DiscSegmenter {
        pub(crate) fn new(radius: u32) -> Self {
            Self {
                radius,
                primes: AtomicUsize::new(0),
            }
        }

        fn disc(&self, size: (u32, u32), center: (u32, u32), radius: u32) -> Mask {
            let r2 = (radius * radius) as i64;
            Mask::from_fn(size.0, size.1, |x, y| {
                let dx = x as i64 - center.0 as i64;
                let dy = y as i64 - center.1 as i64;
                dx * dx + dy * dy <= r2
            })
        }
    }

    impl PromptSegmenter for DiscSegmenter {
        fn prime(&self, image: &RgbImage) -> AnyResult<ImageEmbedding> {
            self.primes.fetch_add(1, Ordering::SeqCst);
            Ok(ImageEmbedding {
                image_size: image.dimensions(),
                features: Vec::new(),
            })
        }

        fn predict(
            &self,
            embedding: &ImageEmbedding,
            points: &[(u32, u32)],
            _labels: &[PointLabel],
            _multimask_output: bool,
        ) -> AnyResult<Vec<Vec<ScoredMask>>> {
            Ok(points
                .iter()
                .map(|&p| {
                    vec![
                        ScoredMask {
                            mask: self.disc(embedding.image_size, p, self.radius / 2),
                            score: 0.4,
                        },
                        ScoredMask {
                            mask: self.disc(embedding.image_size, p, self.radius),
                            score: 0.9,
                        },
                    ]
                })
                .collect())
        }
    }

    struct FailingSegmenter;

    impl PromptSegmenter for FailingSegmenter {
        fn prime(&self, image: &RgbImage) -> AnyResult<ImageEmbedding> {
            Ok(ImageEmbedding {
                image_size: image.dimensions(),
                features: Vec::new(),
            })
        }

        fn predict(
            &self,
            _embedding: &ImageEmbedding,
            _points: &[(u32, u32)],
            _labels: &[PointLabel],
            _multimask_output: bool,
        ) -> AnyResult<Vec<Vec<ScoredMask>>> {
            anyhow::bail!("decoder exploded")
        }
    }

    /// Answers with masks one pixel narrower than the image
    struct MisfitSegmenter;

    impl PromptSegmenter for MisfitSegmenter {
        fn prime(&self, image: &RgbImage) -> AnyResult<ImageEmbedding> {
            Ok(ImageEmbedding {
                image_size: image.dimensions(),
                features: Vec::new(),
            })
        }

        fn predict(
            &self,
            embedding: &ImageEmbedding,
            points: &[(u32, u32)],
            _labels: &[PointLabel],
            _multimask_output: bool,
        ) -> AnyResult<Vec<Vec<ScoredMask>>> {
            let (width, height) = embedding.image_size;
            Ok(points
                .iter()
                .map(|_| {
                    vec![ScoredMask {
                        mask: Mask::from_fn(width - 1, height, |_, _| true),
                        score: 0.9,
                    }]
                })
                .collect())
        }
    }

    pub(crate) fn test_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 3) as u8, (y * 5) as u8, 90])
        });
        render::encode_png(DynamicImage::ImageRgb8(image)).unwrap()
    }

    fn session() -> (MaskSession, Arc<DiscSegmenter>) {
        let segmenter = Arc::new(DiscSegmenter::new(12));
        let session = MaskSession::new(segmenter.clone(), OverlayStyle::default());
        (session, segmenter)
    }

    fn fg(x: u32, y: u32) -> PointPrompt {
        PointPrompt::new(x, y, PointLabel::Foreground)
    }

    fn bg(x: u32, y: u32) -> PointPrompt {
        PointPrompt::new(x, y, PointLabel::Background)
    }

    #[test]
    fn operations_require_an_image() {
        let (mut session, _) = session();
        assert_eq!(session.add_point(fg(1, 1), false).unwrap_err().kind(), "invalid_state");
        assert_eq!(session.undo().unwrap_err().kind(), "invalid_state");
        assert_eq!(session.current_mask().unwrap_err().kind(), "invalid_state");
    }

    #[test]
    fn upload_primes_once_and_returns_base() {
        let (mut session, segmenter) = session();
        let png = test_png(64, 64);

        let composite = session.upload(&png).unwrap();
        assert_eq!(composite, render::decode_image(&png).unwrap());

        session.add_point(fg(10, 10), false).unwrap();
        session.add_point(fg(30, 30), false).unwrap();
        assert_eq!(segmenter.primes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn upload_rejects_garbage_without_losing_state() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();
        session.add_point(fg(10, 10), false).unwrap();

        let err = session.upload(b"not an image").unwrap_err();
        assert_eq!(err.kind(), "decode_error");
        assert_eq!(session.prompts().len(), 1);
    }

    #[test]
    fn prompts_and_masks_stay_paired() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();

        session.add_point(fg(10, 10), false).unwrap();
        session.add_point(bg(12, 12), false).unwrap();
        session.add_point(fg(40, 40), true).unwrap();
        assert_eq!(session.prompts().len(), session.masks().len());

        session.undo().unwrap();
        assert_eq!(session.prompts().len(), 2);
        assert_eq!(session.prompts().len(), session.masks().len());
    }

    #[test]
    fn out_of_bounds_prompt_is_rejected() {
        let (mut session, _) = session();
        session.upload(&test_png(32, 16)).unwrap();

        let err = session.add_point(fg(32, 0), false).unwrap_err();
        assert_eq!(err.kind(), "invalid_prompt");
        assert!(session.prompts().is_empty());
    }

    #[test]
    fn failed_prediction_leaves_history_untouched() {
        let mut session = MaskSession::new(Arc::new(FailingSegmenter), OverlayStyle::default());
        session.upload(&test_png(32, 32)).unwrap();

        let err = session.add_point(fg(5, 5), false).unwrap_err();
        assert_eq!(err.kind(), "collaborator_failure");
        assert!(session.prompts().is_empty());
        assert!(session.masks().is_empty());
    }

    #[test]
    fn background_carves_and_order_does_not_matter() {
        let (mut first, _) = session();
        first.upload(&test_png(64, 64)).unwrap();
        let mask_p1 = first.add_point(fg(10, 10), false).unwrap().mask;
        let combined = first.add_point(bg(20, 10), false).unwrap().mask;

        let (mut alone, _) = session();
        alone.upload(&test_png(64, 64)).unwrap();
        let mask_p2 = alone.add_point(fg(20, 10), false).unwrap().mask;
        assert_eq!(combined, mask_p1.subtract(&mask_p2));

        let (mut swapped, _) = session();
        swapped.upload(&test_png(64, 64)).unwrap();
        swapped.add_point(bg(20, 10), false).unwrap();
        let reordered = swapped.add_point(fg(10, 10), false).unwrap().mask;
        assert_eq!(reordered, combined);
    }

    #[test]
    fn first_background_prompt_gives_empty_mask() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();
        let outcome = session.add_point(bg(20, 20), false).unwrap();
        assert!(outcome.mask.is_empty());
        assert_eq!(session.masks().len(), 1);
    }

    #[test]
    fn multi_object_keeps_objects_apart() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();

        session.add_point(fg(10, 10), true).unwrap();
        let outcome = session.add_point(fg(50, 50), true).unwrap();

        assert_eq!(outcome.objects.len(), 2);
        // the newest mask covers only the second click
        assert!(outcome.mask.get(50, 50));
        assert!(!outcome.mask.get(10, 10));
    }

    #[test]
    fn multi_object_background_click_is_an_independent_region() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();

        session.add_point(fg(10, 10), true).unwrap();
        let outcome = session.add_point(bg(50, 50), true).unwrap();

        assert!(!outcome.mask.is_empty());
        assert!(outcome.mask.get(50, 50));
        assert!(!outcome.mask.get(10, 10));
        assert_eq!(outcome.objects.len(), 2);
    }

    #[test]
    fn background_click_shrinks_current_mask() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();
        assert!(session.current_mask().unwrap().is_empty());

        session.add_point(fg(20, 20), false).unwrap();
        let before = session.current_mask().unwrap().foreground_fraction();
        session.add_point(bg(26, 20), false).unwrap();
        let after = session.current_mask().unwrap().foreground_fraction();

        assert!(after > 0.0);
        assert!(after < before);
        assert_eq!(session.current_mask().unwrap(), session.masks()[1]);

        session.undo().unwrap();
        assert_eq!(session.current_mask().unwrap().foreground_fraction(), before);
    }

    #[test]
    fn current_mask_joins_separate_objects() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();

        let first = session.add_point(fg(10, 10), true).unwrap().mask;
        let second = session.add_point(fg(50, 50), true).unwrap().mask;
        assert_eq!(session.current_mask().unwrap(), first.union(&second));
    }

    #[test]
    fn wrongly_sized_candidates_are_a_collaborator_failure() {
        let mut session = MaskSession::new(Arc::new(MisfitSegmenter), OverlayStyle::default());
        session.upload(&test_png(32, 32)).unwrap();

        let err = session.add_point(fg(5, 5), false).unwrap_err();
        assert_eq!(err.kind(), "collaborator_failure");
        assert!(session.prompts().is_empty());
        assert!(session.masks().is_empty());
    }

    #[test]
    fn tagged_prompts_refine_their_own_object() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();

        session.add_point(fg(10, 10).with_object(1), false).unwrap();
        session.add_point(fg(50, 50).with_object(2), false).unwrap();
        let outcome = session.add_point(fg(14, 10).with_object(1), false).unwrap();

        assert!(outcome.mask.get(10, 10));
        assert!(outcome.mask.get(20, 10));
        assert!(!outcome.mask.get(50, 50));
    }

    #[test]
    fn undo_after_one_point_restores_upload_composite() {
        let (mut session, _) = session();
        let initial = session.upload(&test_png(64, 48)).unwrap();

        session.add_point(fg(20, 20), false).unwrap();
        let restored = session.undo().unwrap();
        assert_eq!(restored, initial);
    }

    #[test]
    fn undo_twice_matches_fresh_upload() {
        let png = test_png(64, 64);
        let (mut session, _) = session();
        session.upload(&png).unwrap();
        session.add_point(fg(10, 10), false).unwrap();
        session.add_point(fg(40, 40), false).unwrap();
        session.undo().unwrap();
        let after = session.undo().unwrap();

        let (mut fresh, _) = self::session();
        let expected = fresh.upload(&png).unwrap();
        assert_eq!(after, expected);
        assert!(session.prompts().is_empty());
        assert!(session.masks().is_empty());
        assert_eq!(session.undo().unwrap_err().kind(), "empty_history");
    }

    #[test]
    fn composite_matches_full_replay() {
        let (mut session, _) = session();
        session.upload(&test_png(64, 64)).unwrap();
        session.add_point(fg(10, 10), false).unwrap();
        session.add_point(fg(20, 20), false).unwrap();
        let last = session.add_point(fg(30, 30), false).unwrap().composite;

        let replay = render::compose(
            session.base_image().unwrap(),
            session.masks(),
            session.prompts(),
            &OverlayStyle::default(),
        );
        assert_eq!(last, replay);
    }

    #[test]
    fn cache_follows_history() {
        let root = tempfile::tempdir().unwrap();
        let cache = MaskCache::new(root.path(), "session").unwrap();
        let (session, _) = session();
        let mut session = session.with_cache(cache);

        session.upload(&test_png(32, 32)).unwrap();
        session.add_point(fg(5, 5), false).unwrap();
        session.add_point(fg(20, 20), false).unwrap();
        let dir = root.path().join("session");
        assert!(dir.join("mask_1.png").exists());

        session.undo().unwrap();
        assert!(!dir.join("mask_1.png").exists());
        assert!(dir.join("mask_0.png").exists());

        session.upload(&test_png(32, 32)).unwrap();
        assert!(!dir.join("mask_0.png").exists());
    }
}
