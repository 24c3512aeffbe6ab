//! Object projection applied before caching
//!
//! A projection is a pure function of the remote object. The same projection is
//! applied to listed and watched objects so the cache never mixes shapes.

use crate::message::RawObject;
use std::sync::Arc;

/// Object shaping strategy
pub trait Projection: Send + Sync {
    fn project(&self, object: RawObject) -> RawObject;
    fn name(&self) -> &'static str;
}

/// Stores objects verbatim
pub struct IdentityProjection;

impl Projection for IdentityProjection {
    fn project(&self, object: RawObject) -> RawObject {
        object
    }
    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Removes fields addressed by dotted paths (e.g. `metadata.managedFields`)
pub struct StripFieldsProjection {
    paths: Vec<Vec<String>>,
}

impl StripFieldsProjection {
    pub fn new(paths: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let paths = paths
            .into_iter()
            .map(|p| p.as_ref().split('.').map(str::to_string).collect::<Vec<_>>())
            .filter(|segments| segments.iter().all(|s| !s.is_empty()))
            .collect();
        Self { paths }
    }

    fn strip(object: &mut RawObject, path: &[String]) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut current = object;
        for segment in parents {
            match current.get_mut(segment.as_str()) {
                Some(next) => current = next,
                None => return,
            }
        }
        if let Some(map) = current.as_object_mut() {
            map.remove(last.as_str());
        }
    }
}

impl Projection for StripFieldsProjection {
    fn project(&self, mut object: RawObject) -> RawObject {
        for path in &self.paths {
            Self::strip(&mut object, path);
        }
        object
    }
    fn name(&self) -> &'static str {
        "strip_fields"
    }
}

/// Adapts a user-supplied closure
pub struct FnProjection<F>(pub F);

impl<F> Projection for FnProjection<F>
where
    F: Fn(RawObject) -> RawObject + Send + Sync,
{
    fn project(&self, object: RawObject) -> RawObject {
        (self.0)(object)
    }
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Build the projection described by a list of field paths
pub fn from_strip_fields(fields: &[String]) -> Arc<dyn Projection> {
    if fields.is_empty() {
        Arc::new(IdentityProjection)
    } else {
        Arc::new(StripFieldsProjection::new(fields))
    }
}
