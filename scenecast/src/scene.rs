//! Scenes and the scene registry.
//!
//! A scene is a pub/sub topic identified by a URL. Its member set holds
//! socket handles, not connections; lookups resolve back through the
//! connection registry, so neither side owns the other.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ident::{IdSequence, SCENE_ID_BASE};

/// A shared topic.
#[derive(Debug)]
pub struct Scene {
    /// Server-assigned 8-hex scene id.
    pub id: String,
    /// The routing key clients use (SCU).
    pub url: String,
    /// The display name (SCN).
    pub name: String,
    /// Socket handles of the member connections.
    pub members: HashSet<u64>,
}

impl Scene {
    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Registry of all live scenes, addressable by URL and by id.
///
/// A scene is registered in both maps or in neither.
pub struct SceneRegistry {
    by_url: HashMap<String, Rc<RefCell<Scene>>>,
    by_id: HashMap<String, Rc<RefCell<Scene>>>,
    ids: IdSequence,

    /// Scenes created over the lifetime of the process.
    pub scenes_total: u64,
}

impl SceneRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_url: HashMap::new(),
            by_id: HashMap::new(),
            ids: IdSequence::new(SCENE_ID_BASE),
            scenes_total: 0,
        }
    }

    /// Number of live scenes.
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    /// Whether there are no live scenes.
    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// Look up a scene by its URL.
    pub fn find_by_url(&self, url: &str) -> Option<Rc<RefCell<Scene>>> {
        self.by_url.get(url).cloned()
    }

    /// Look up a scene by its id.
    pub fn find_by_id(&self, id: &str) -> Option<Rc<RefCell<Scene>>> {
        self.by_id.get(id).cloned()
    }

    /// Create a scene with its first member and register it in both maps.
    pub fn create(&mut self, url: &str, name: &str, first_member: u64) -> Rc<RefCell<Scene>> {
        let id = self.ids.next_id();
        let scene = Rc::new(RefCell::new(Scene {
            id: id.clone(),
            url: url.to_string(),
            name: name.to_string(),
            members: HashSet::from([first_member]),
        }));
        self.by_id.insert(id, scene.clone());
        self.by_url.insert(url.to_string(), scene.clone());
        self.scenes_total += 1;
        scene
    }

    /// Deregister a scene from both maps.
    pub fn destroy(&mut self, scene: &Rc<RefCell<Scene>>) {
        let scene = scene.borrow();
        self.by_id.remove(&scene.id);
        self.by_url.remove(&scene.url);
    }

    /// A snapshot of all live scenes.
    pub fn all(&self) -> Vec<Rc<RefCell<Scene>>> {
        self.by_url.values().cloned().collect()
    }
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_registers_in_both_maps() {
        let mut scenes = SceneRegistry::new();
        let scene = scenes.create("rid://r1", "Room", 7);

        let id = scene.borrow().id.clone();
        assert_eq!(id, "00020001");
        assert!(scenes.find_by_url("rid://r1").is_some());
        assert!(scenes.find_by_id(&id).is_some());
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes.scenes_total, 1);
        assert!(scene.borrow().members.contains(&7));
    }

    #[test]
    fn test_destroy_removes_from_both_maps() {
        let mut scenes = SceneRegistry::new();
        let scene = scenes.create("rid://r1", "Room", 7);
        let id = scene.borrow().id.clone();

        scenes.destroy(&scene);
        assert!(scenes.find_by_url("rid://r1").is_none());
        assert!(scenes.find_by_id(&id).is_none());
        assert!(scenes.is_empty());
    }

    #[test]
    fn test_scene_ids_are_distinct_numbering_space() {
        let mut scenes = SceneRegistry::new();
        let first = scenes.create("rid://a", "A", 1);
        let second = scenes.create("rid://b", "B", 2);
        assert_eq!(first.borrow().id, "00020001");
        assert_eq!(second.borrow().id, "00020002");
    }
}
