//! The language-neutral construction interface.
//!
//! A configuration front end (a parser for the textual language, a control
//! socket, a test) delivers an ordered stream of [`ConfigEvent`]s:
//! element declarations, connections, and requirements, each with a
//! landmark. [`build_router`] applies the stream to a fresh [`Router`],
//! instantiating element classes through an [`ElementRegistry`]. The
//! configuration *language* itself stays outside the core.
//!
//! Configurations may also arrive packed in an `ar`-style archive (see
//! [`archive`]); the member named `config` holds the configuration proper.

pub mod archive;
pub mod args;

use std::collections::HashMap;
use std::sync::Arc;

use crate::element::Element;
use crate::master::Master;
use crate::report::{ErrorHandler, Landmark};
use crate::router::{Router, RouterError};

/// One construction event.
#[derive(Clone, Debug)]
pub enum ConfigEvent {
    /// Declare an element.
    Element {
        /// The element's full (scope-prefixed) name.
        name: String,
        /// Its class.
        class: String,
        /// Its raw configuration arguments.
        config: String,
        /// Where it was declared.
        landmark: Landmark,
    },
    /// Connect an output port to an input port.
    Connection {
        /// Source element name.
        from: String,
        /// Source output port.
        from_port: usize,
        /// Destination element name.
        to: String,
        /// Destination input port.
        to_port: usize,
        /// Where the connection was written.
        landmark: Landmark,
    },
    /// Record a requirement.
    Requirement {
        /// The requirement kind, e.g. `"package"`.
        kind: String,
        /// Its value.
        value: String,
    },
}

/// Instantiates elements by class name.
#[derive(Default)]
pub struct ElementRegistry {
    factories: HashMap<String, Box<dyn Fn() -> Box<dyn Element> + Send + Sync>>,
}

impl ElementRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `class`.
    pub fn register(&mut self, class: &str, factory: impl Fn() -> Box<dyn Element> + Send + Sync + 'static) {
        self.factories.insert(class.to_owned(), Box::new(factory));
    }

    /// Registers `class` backed by `T::default()`.
    pub fn register_default<T: Element + Default>(&mut self, class: &str) {
        self.register(class, || Box::new(T::default()));
    }

    /// Instantiates an element of `class`.
    pub fn create(&self, class: &str) -> Option<Box<dyn Element>> {
        self.factories.get(class).map(|f| f())
    }

    /// The registered class names, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }
}

/// Applies a construction event stream to a fresh router.
///
/// The router is returned un-initialized; run [`Router::initialize`] next.
/// Unknown classes, unknown element names, and construction failures are
/// reported through `errh` with the event's landmark.
pub fn build_router(
    master: &Arc<Master>,
    registry: &ElementRegistry,
    events: impl IntoIterator<Item = ConfigEvent>,
    errh: &mut dyn ErrorHandler,
) -> Result<Router, RouterError> {
    let mut router = Router::new(master);
    let before = errh.nerrors();
    for event in events {
        match event {
            ConfigEvent::Element { name, class, config, landmark } => {
                let Some(element) = registry.create(&class) else {
                    errh.lerror(&landmark, &format!("unknown element class {:?}", class));
                    continue;
                };
                if let Err(e) = router.add_element(element, &name, &config, landmark.clone()) {
                    errh.lerror(&landmark, &e.to_string());
                }
            }
            ConfigEvent::Connection { from, from_port, to, to_port, landmark } => {
                let from_e = router.element_by_name(&from);
                let to_e = router.element_by_name(&to);
                let (Some(from_e), Some(to_e)) = (from_e, to_e) else {
                    let missing = if from_e.is_none() { &from } else { &to };
                    errh.lerror(&landmark, &format!("no element named {:?}", missing));
                    continue;
                };
                if let Err(e) = router.add_connection(from_e, from_port, to_e, to_port, landmark.clone()) {
                    errh.lerror(&landmark, &e.to_string());
                }
            }
            ConfigEvent::Requirement { kind, value } => {
                router.add_requirement(&kind, &value);
            }
        }
    }
    if errh.nerrors() > before {
        Err(RouterError::GraphError)
    } else {
        Ok(router)
    }
}
