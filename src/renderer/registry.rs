// renderer/registry.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::renderable::Renderable;
use super::{GeometryHandle, ShaderHandle, TextureHandle};

/// Renderables sharing one shader and slot-0 texture.
pub struct Batch {
    pub shader: ShaderHandle,
    pub texture: Option<TextureHandle>,
    pub renderables: Vec<Arc<dyn Renderable>>,
}

type BatchKey = (ShaderHandle, Option<TextureHandle>);

#[derive(Default)]
struct Batches {
    /// Kept contiguous per shader, shaders and buckets in first-registration
    /// order.
    list: Vec<Batch>,
    index: HashMap<BatchKey, usize>,
}

impl Batches {
    fn add(&mut self, renderable: Arc<dyn Renderable>, shader: ShaderHandle) {
        let key = (shader, renderable.texture(0));
        if let Some(&slot) = self.index.get(&key) {
            self.list[slot].renderables.push(renderable);
            return;
        }

        let at = self
            .list
            .iter()
            .rposition(|batch| batch.shader == shader)
            .map_or(self.list.len(), |last| last + 1);
        self.list.insert(
            at,
            Batch {
                shader,
                texture: key.1,
                renderables: vec![renderable],
            },
        );
        self.reindex();
    }

    fn remove(&mut self, geometry: GeometryHandle) -> bool {
        for slot in 0..self.list.len() {
            let renderables = &mut self.list[slot].renderables;
            let Some(pos) = renderables.iter().position(|r| r.geometry() == geometry) else {
                continue;
            };
            renderables.remove(pos);
            if renderables.is_empty() {
                self.list.remove(slot);
                self.reindex();
            }
            return true;
        }
        false
    }

    fn reindex(&mut self) {
        self.index.clear();
        self.index.extend(
            self.list
                .iter()
                .enumerate()
                .map(|(slot, batch)| ((batch.shader, batch.texture), slot)),
        );
    }
}

/// Renderables grouped by shader, then by slot-0 texture.
///
/// One mutex guards the whole registry. Every mutation and every traversal
/// holds it for its full duration, so a traversal always sees the result of
/// some serial order of the mutations. Game-logic threads share the registry
/// through an `Arc` while the render thread traverses it.
#[derive(Default)]
pub struct RenderRegistry {
    batches: Mutex<Batches>,
}

impl RenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The batch list stays consistent even if a holder panicked: every
    // mutation either completes or leaves the previous state untouched.
    fn lock(&self) -> MutexGuard<'_, Batches> {
        self.batches.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn add(&self, renderable: Arc<dyn Renderable>, shader: ShaderHandle) {
        self.lock().add(renderable, shader);
    }

    /// Adds every renderable under one lock hold.
    pub fn add_all<I>(&self, renderables: I, shader: ShaderHandle)
    where
        I: IntoIterator<Item = Arc<dyn Renderable>>,
    {
        let mut batches = self.lock();
        for renderable in renderables {
            batches.add(renderable, shader);
        }
    }

    /// Removes the first renderable sharing `renderable`'s geometry. Returns
    /// whether anything was removed.
    pub fn remove(&self, renderable: &dyn Renderable) -> bool {
        self.lock().remove(renderable.geometry())
    }

    /// Removes each renderable in order; absent ones are skipped.
    pub fn remove_all<'a, I>(&self, renderables: I) -> usize
    where
        I: IntoIterator<Item = &'a dyn Renderable>,
    {
        let mut batches = self.lock();
        renderables
            .into_iter()
            .filter(|renderable| batches.remove(renderable.geometry()))
            .count()
    }

    pub fn clear(&self) {
        let mut batches = self.lock();
        batches.list.clear();
        batches.index.clear();
    }

    pub fn len(&self) -> usize {
        self.lock()
            .list
            .iter()
            .map(|batch| batch.renderables.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().list.is_empty()
    }

    /// Runs `f` with the lock held. `f` may walk the groups any number of
    /// times and always sees the same content.
    pub fn traverse<R>(&self, f: impl FnOnce(ShaderGroups<'_>) -> R) -> R {
        let batches = self.lock();
        f(ShaderGroups {
            batches: &batches.list,
        })
    }

    /// Calls `f` once per shader with that shader's buckets, holding the lock
    /// across the whole traversal.
    pub fn for_each_shader_group(&self, mut f: impl FnMut(ShaderHandle, &[Batch])) {
        self.traverse(|groups| {
            for (shader, batches) in groups.iter() {
                f(shader, batches);
            }
        });
    }

    /// Geometry handles per bucket, in traversal order.
    pub fn snapshot(&self) -> Vec<ShaderGroupSnapshot> {
        let mut groups = Vec::new();
        self.for_each_shader_group(|shader, batches| {
            groups.push(ShaderGroupSnapshot {
                shader,
                buckets: batches
                    .iter()
                    .map(|batch| BucketSnapshot {
                        texture: batch.texture,
                        geometries: batch.renderables.iter().map(|r| r.geometry()).collect(),
                    })
                    .collect(),
            });
        });
        groups
    }
}

/// Batches grouped by shader, borrowed from a locked registry.
#[derive(Clone, Copy)]
pub struct ShaderGroups<'a> {
    batches: &'a [Batch],
}

impl<'a> ShaderGroups<'a> {
    pub fn iter(self) -> impl Iterator<Item = (ShaderHandle, &'a [Batch])> {
        self.batches
            .chunk_by(|a, b| a.shader == b.shader)
            .map(|group| (group[0].shader, group))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderGroupSnapshot {
    pub shader: ShaderHandle,
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub texture: Option<TextureHandle>,
    pub geometries: Vec<GeometryHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::renderable::ModelView;

    fn view(geometry: u32, texture: u32) -> Arc<dyn Renderable> {
        Arc::new(
            ModelView::new(GeometryHandle::new(geometry))
                .with_texture(0, TextureHandle::new(texture)),
        )
    }

    const S1: ShaderHandle = ShaderHandle::new(1);
    const S2: ShaderHandle = ShaderHandle::new(2);

    #[test]
    fn same_key_lands_in_one_bucket_regardless_of_interleaving() {
        let registry = RenderRegistry::new();
        registry.add(view(1, 10), S1);
        registry.add(view(2, 10), S2);
        registry.add(view(3, 11), S1);
        registry.add(view(4, 10), S1);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].shader, S1);
        assert_eq!(
            snapshot[0].buckets[0].geometries,
            vec![GeometryHandle::new(1), GeometryHandle::new(4)]
        );
        assert_eq!(snapshot[0].buckets[1].geometries, vec![GeometryHandle::new(3)]);
        assert_eq!(snapshot[1].shader, S2);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn removing_the_only_model_of_a_texture_leaves_the_other_buckets() {
        let (t1, t2) = (10, 11);
        let registry = RenderRegistry::new();
        let a = view(1, t1);
        let b = view(2, t2);
        let c = view(3, t1);
        registry.add(a, S1);
        registry.add(b.clone(), S1);
        registry.add(c, S2);

        assert!(registry.remove(b.as_ref()));

        assert_eq!(
            registry.snapshot(),
            vec![
                ShaderGroupSnapshot {
                    shader: S1,
                    buckets: vec![BucketSnapshot {
                        texture: Some(TextureHandle::new(t1)),
                        geometries: vec![GeometryHandle::new(1)],
                    }],
                },
                ShaderGroupSnapshot {
                    shader: S2,
                    buckets: vec![BucketSnapshot {
                        texture: Some(TextureHandle::new(t1)),
                        geometries: vec![GeometryHandle::new(3)],
                    }],
                },
            ]
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_matches_by_geometry_and_drops_empty_buckets() {
        let registry = RenderRegistry::new();
        registry.add(view(1, 10), S1);
        registry.add(view(2, 11), S1);

        // Different texture and transform, same geometry.
        let alias = ModelView::new(GeometryHandle::new(2));
        assert!(registry.remove(&alias));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].buckets.len(), 1);
        assert_eq!(snapshot[0].buckets[0].texture, Some(TextureHandle::new(10)));
    }

    #[test]
    fn removing_absent_renderable_is_a_no_op() {
        let registry = RenderRegistry::new();
        registry.add(view(1, 10), S1);
        let before = registry.snapshot();

        assert!(!registry.remove(view(99, 10).as_ref()));
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn remove_all_tolerates_duplicates() {
        let registry = RenderRegistry::new();
        let a = view(1, 10);
        let b = view(2, 10);
        registry.add_all([a.clone(), b.clone()], S1);

        let removed = registry.remove_all([a.as_ref(), a.as_ref(), b.as_ref()]);
        assert_eq!(removed, 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_is_idempotent() {
        let registry = RenderRegistry::new();
        registry.add(view(1, 10), S1);
        registry.clear();
        assert!(registry.snapshot().is_empty());
        registry.clear();
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn emptied_shader_group_disappears_and_new_buckets_stay_grouped() {
        let registry = RenderRegistry::new();
        registry.add(view(1, 10), S1);
        registry.add(view(2, 10), S2);
        registry.remove(view(1, 10).as_ref());
        registry.add(view(3, 12), S2);
        registry.add(view(4, 10), S1);

        let shaders: Vec<_> = registry.snapshot().iter().map(|g| g.shader).collect();
        assert_eq!(shaders, vec![S2, S1]);
        assert_eq!(registry.snapshot()[0].buckets.len(), 2);
    }
}
