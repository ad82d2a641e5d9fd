//! Deployment watch events and the cache that derives them from a raw watch stream.

use std::collections::{BTreeMap, HashMap, HashSet};

use k8s_openapi::api::apps::v1::Deployment;
use kube::{runtime::watcher, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::models::DeploymentCoordinates;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The annotation that opts a Deployment into pescar.
pub const PESCAR_ANNOTATION: &str = "pescar";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The parts of a Deployment pescar looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentView {
    /// The namespace of the Deployment.
    pub namespace: String,

    /// The name of the Deployment.
    pub name: String,

    /// The resource version the view was taken at.
    pub resource_version: Option<String>,

    /// The Deployment's annotations.
    pub annotations: BTreeMap<String, String>,

    /// `(container name, image)` for every container of the pod template.
    pub containers: Vec<(String, String)>,
}

/// The annotations a Deployment must carry to be tracked.
///
/// A Deployment matches when every entry is present on it with an equal value. Values are
/// compared case-insensitively so `"True"` and `"true"` both opt in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationFilter(BTreeMap<String, String>);

/// One container of one Deployment together with its current image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentImage {
    /// Where the container lives, and whether it should be tracked.
    pub deployment: DeploymentCoordinates,

    /// The image reference from the pod template.
    pub image: String,
}

/// A change to the set of tracked Deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// A Deployment started matching the filter.
    Created(Vec<DeploymentImage>),

    /// A matched Deployment changed. The new images are inactive if it no longer matches.
    Updated {
        /// The images before the change.
        old: Vec<DeploymentImage>,

        /// The images after the change.
        new: Vec<DeploymentImage>,
    },

    /// A matched Deployment went away.
    Deleted(Vec<DeploymentImage>),

    /// The watch finished listing the cluster. These are the images of every matched
    /// Deployment, so anything tracked that is missing here no longer exists.
    Listed(Vec<DeploymentImage>),
}

/// Turns raw watch events into [`DeploymentEvent`]s.
///
/// It remembers every matched Deployment so updates can carry the previous images and so a
/// relist can detect Deployments that were deleted while the watch was down.
#[derive(Debug)]
pub struct WatchCache {
    filter: AnnotationFilter,
    tracked: HashMap<(String, String), DeploymentView>,
    relisted: Option<HashSet<(String, String)>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DeploymentView {
    fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    /// The images of the view, flagged with `active`.
    pub fn images(&self, active: bool) -> Vec<DeploymentImage> {
        self.containers
            .iter()
            .map(|(container_name, image)| DeploymentImage {
                deployment: DeploymentCoordinates {
                    namespace: self.namespace.clone(),
                    name: self.name.clone(),
                    container_name: container_name.clone(),
                    active,
                },
                image: image.clone(),
            })
            .collect()
    }
}

impl AnnotationFilter {
    /// Creates a filter from annotation entries.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Whether `annotations` satisfy the filter.
    pub fn matches(&self, annotations: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(key, expected)| {
            annotations
                .get(key)
                .is_some_and(|value| value.eq_ignore_ascii_case(expected))
        })
    }
}

impl WatchCache {
    /// Creates an empty cache.
    pub fn new(filter: AnnotationFilter) -> Self {
        Self {
            filter,
            tracked: HashMap::new(),
            relisted: None,
        }
    }

    /// Feeds one watch event and returns the domain events it produces.
    pub fn handle(&mut self, event: watcher::Event<DeploymentView>) -> Vec<DeploymentEvent> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(view) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(view.key());
                }
                self.apply(view).into_iter().collect()
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };

                let gone: Vec<_> = self
                    .tracked
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();

                let mut events: Vec<_> = gone
                    .into_iter()
                    .filter_map(|key| self.tracked.remove(&key))
                    .map(|view| DeploymentEvent::Deleted(view.images(false)))
                    .collect();

                let listed = self.tracked.values().flat_map(|view| view.images(true)).collect();
                events.push(DeploymentEvent::Listed(listed));
                events
            }
            watcher::Event::Apply(view) => self.apply(view).into_iter().collect(),
            watcher::Event::Delete(view) => self
                .tracked
                .remove(&view.key())
                .map(|old| DeploymentEvent::Deleted(old.images(false)))
                .into_iter()
                .collect(),
        }
    }

    fn apply(&mut self, view: DeploymentView) -> Option<DeploymentEvent> {
        let matched = self.filter.matches(&view.annotations);
        let key = view.key();

        match self.tracked.get(&key) {
            None if matched => {
                let event = DeploymentEvent::Created(view.images(true));
                self.tracked.insert(key, view);
                Some(event)
            }
            None => None,
            Some(old) if old.resource_version.is_some() && old.resource_version == view.resource_version => {
                None
            }
            Some(old) => {
                let event = DeploymentEvent::Updated {
                    old: old.images(true),
                    new: view.images(matched),
                };
                if matched {
                    self.tracked.insert(key, view);
                } else {
                    self.tracked.remove(&key);
                }
                Some(event)
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for AnnotationFilter {
    fn default() -> Self {
        Self::new([(PESCAR_ANNOTATION.to_string(), "true".to_string())])
    }
}

impl From<&Deployment> for DeploymentView {
    fn from(deployment: &Deployment) -> Self {
        let containers = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .map(|pod| {
                pod.containers
                    .iter()
                    .filter_map(|c| c.image.clone().map(|image| (c.name.clone(), image)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            namespace: deployment.namespace().unwrap_or_default(),
            name: deployment.name_any(),
            resource_version: deployment.resource_version(),
            annotations: deployment.annotations().clone(),
            containers,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
