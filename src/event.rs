//! In-memory event store with named, typed collections.

use crate::error::EventError;
use std::any::{type_name, Any};
use std::collections::HashMap;

struct Collection {
    type_name: &'static str,
    data: Box<dyn Any>,
}

/// One event: a number plus collections keyed by name.
///
/// Each collection is a `Vec<T>` and can only be read back as the same `T`.
#[derive(Default)]
pub struct Event {
    pub number: u64,
    collections: HashMap<String, Collection>,
}

impl Event {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            collections: HashMap::new(),
        }
    }

    pub fn get_collection<T: 'static>(&self, name: &str) -> Result<&[T], EventError> {
        let collection = self
            .collections
            .get(name)
            .ok_or_else(|| EventError::MissingCollection(name.to_string()))?;
        collection
            .data
            .downcast_ref::<Vec<T>>()
            .map(Vec::as_slice)
            .ok_or_else(|| EventError::TypeMismatch {
                name: name.to_string(),
                stored: collection.type_name,
                requested: type_name::<T>(),
            })
    }

    /// Adds a new collection; existing names are never overwritten.
    pub fn add<T: 'static>(&mut self, name: &str, items: Vec<T>) -> Result<(), EventError> {
        if self.collections.contains_key(name) {
            return Err(EventError::DuplicateCollection(name.to_string()));
        }
        self.collections.insert(
            name.to_string(),
            Collection {
                type_name: type_name::<T>(),
                data: Box::new(items),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Collection names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("number", &self.number)
            .field("collections", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_returns_typed_collections() {
        let mut event = Event::new(4);
        event.add("numbers", vec![1u32, 2, 3]).unwrap();
        event.add("names", vec!["a".to_string()]).unwrap();
        assert_eq!(event.get_collection::<u32>("numbers").unwrap(), &[1, 2, 3]);
        assert!(event.contains("names"));
        assert_eq!(event.names(), vec!["names", "numbers"]);
    }

    #[test]
    fn reports_missing_mistyped_and_duplicate_collections() {
        let mut event = Event::new(0);
        event.add("numbers", vec![1u32]).unwrap();
        assert_eq!(
            event.get_collection::<u32>("other"),
            Err(EventError::MissingCollection("other".into()))
        );
        match event.get_collection::<f64>("numbers") {
            Err(EventError::TypeMismatch {
                stored, requested, ..
            }) => {
                assert_eq!(stored, type_name::<u32>());
                assert_eq!(requested, "f64");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            event.add("numbers", vec![2u32]),
            Err(EventError::DuplicateCollection("numbers".into()))
        );
        assert_eq!(event.get_collection::<u32>("numbers").unwrap(), &[1]);
    }
}
