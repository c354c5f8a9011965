//! Component traits and the built-in components every registry understands.
//!
//! Any `'static` value that is `Clone` and round-trips through serde is a
//! [`Component`]. The object-safe [`ComponentValue`] view is what name-keyed
//! dispatch and serialization see when the concrete type is not known.

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::RegistryError;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Marker trait for values that can live in a component storage.
///
/// Blanket-implemented; there is nothing to implement by hand.
pub trait Component: Any + Clone + Serialize + DeserializeOwned {}

impl<T> Component for T where T: Any + Clone + Serialize + DeserializeOwned {}

// ---------------------------------------------------------------------------
// ComponentValue
// ---------------------------------------------------------------------------

/// Type-erased view of a single component value.
pub trait ComponentValue: Any {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Rust type name of the concrete component, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Serialize the value into a JSON tree.
    fn save(&self) -> Result<serde_json::Value, RegistryError>;

    /// Overwrite the value with one deserialized from `value`.
    fn load(&mut self, value: serde_json::Value) -> Result<(), RegistryError>;
}

impl<T: Component> ComponentValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn save(&self) -> Result<serde_json::Value, RegistryError> {
        serde_json::to_value(self).map_err(|e| RegistryError::ComponentDeserialization {
            component: std::any::type_name::<T>().to_owned(),
            details: e.to_string(),
        })
    }

    fn load(&mut self, value: serde_json::Value) -> Result<(), RegistryError> {
        *self = serde_json::from_value(value).map_err(|e| {
            RegistryError::ComponentDeserialization {
                component: std::any::type_name::<T>().to_owned(),
                details: e.to_string(),
            }
        })?;
        Ok(())
    }
}

impl dyn ComponentValue {
    /// Downcast to a concrete component type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to a concrete component type.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

// ---------------------------------------------------------------------------
// Built-in components
// ---------------------------------------------------------------------------

/// Human-readable entity name. Looked up by linear scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameComponent {
    pub name: String,
}

/// Entity tag. Read-only outside the crate; `EntityRegistry::set_tag` keeps
/// the tag index in sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagComponent {
    pub(crate) tag: String,
}

impl TagComponent {
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// Local transform. Emplacing or patching one marks the entity dirty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformComponent {
    pub position: [f32; 3],
    /// Quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }
}

/// Present while the entity is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledComponent;

/// Present while the entity should be drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderableComponent;

/// Raised when cached data derived from the entity's transform or hierarchy
/// must be recomputed. Consumers clear it once they have caught up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyComponent;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_through_erased_view() {
        let source = TransformComponent {
            position: [1.0, 2.0, 3.0],
            ..Default::default()
        };
        let json = (&source as &dyn ComponentValue).save().unwrap();

        let mut target = TransformComponent::default();
        (&mut target as &mut dyn ComponentValue).load(json).unwrap();
        assert_eq!(target, source);
    }

    #[test]
    fn load_rejects_mismatched_shape() {
        let mut name = NameComponent::default();
        let err = (&mut name as &mut dyn ComponentValue)
            .load(serde_json::json!(42))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ComponentDeserialization { .. }));
    }

    #[test]
    fn downcast_matches_concrete_type() {
        let tag = TagComponent { tag: "Enemy".into() };
        let erased: &dyn ComponentValue = &tag;
        assert_eq!(erased.downcast_ref::<TagComponent>(), Some(&tag));
        assert!(erased.downcast_ref::<NameComponent>().is_none());
        assert!(erased.type_name().ends_with("TagComponent"));
    }

    #[test]
    fn marker_components_save_as_null() {
        let json = (&EnabledComponent as &dyn ComponentValue).save().unwrap();
        assert!(json.is_null());
    }

    #[test]
    fn transform_fills_missing_fields_with_defaults() {
        let mut t = TransformComponent::default();
        (&mut t as &mut dyn ComponentValue)
            .load(serde_json::json!({ "position": [4.0, 0.0, 0.0] }))
            .unwrap();
        assert_eq!(t.position, [4.0, 0.0, 0.0]);
        assert_eq!(t.scale, [1.0; 3]);
    }
}
