//! Container behavior: lifetimes, scopes, interfaces and cycles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use scoped_server::container::{Container, ContainerError, Injectable, Param, TypeDescriptor};
use scoped_server::implements;

static COUNTER_BUILDS: AtomicUsize = AtomicUsize::new(0);

struct Counter {
    serial: usize,
}

impl Injectable for Counter {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Vec::new(), |_| {
            Ok(Counter {
                serial: COUNTER_BUILDS.fetch_add(1, Ordering::SeqCst),
            })
        })
    }
}

#[test]
fn singleton_is_shared_and_new_instance_is_not() {
    let root = Container::new();
    root.register::<Counter>().unwrap();

    let a = root.get::<Counter>().unwrap();
    let b = root.get::<Counter>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let fresh = root.new_instance::<Counter>().unwrap();
    assert_ne!(fresh.serial, a.serial);
    assert!(Arc::ptr_eq(&a, &root.get::<Counter>().unwrap()));
}

struct Settings(&'static str);

#[test]
fn child_sees_parent_but_parent_does_not_see_child() {
    let root = Container::new();
    root.register_instance(Settings("root"), None).unwrap();

    let child = root.create_container();
    child.register_instance(7u32, None).unwrap();

    assert_eq!(child.get::<Settings>().unwrap().0, "root");
    assert_eq!(*child.get::<u32>().unwrap(), 7);
    assert!(matches!(
        root.get::<u32>(),
        Err(ContainerError::NotRegistered { .. })
    ));
}

#[test]
fn child_registration_shadows_parent() {
    let root = Container::new();
    root.register_instance(Settings("root"), None).unwrap();
    let child = root.create_container();
    child.register_instance(Settings("child"), None).unwrap();

    assert_eq!(child.get::<Settings>().unwrap().0, "child");
    assert_eq!(root.get::<Settings>().unwrap().0, "root");
}

#[test]
fn disposing_a_scope_leaves_siblings_and_root_intact() {
    let root = Container::new();
    root.register_instance(Settings("root"), None).unwrap();
    let first = root.create_container();
    let second = root.create_container();
    first.register_instance(1u8, None).unwrap();
    second.register_instance(2u8, None).unwrap();

    first.dispose();
    first.dispose();

    assert!(first.is_disposed());
    assert_eq!(first.get::<u8>(), Err(ContainerError::Disposed));
    assert_eq!(*second.get::<u8>().unwrap(), 2);
    assert_eq!(root.get::<Settings>().unwrap().0, "root");
    assert_eq!(root.child_count(), 1);
}

#[test]
fn disposing_root_disposes_every_descendant() {
    let root = Container::new();
    let child = root.create_container();
    let grandchild = child.create_container();

    root.dispose();
    assert!(child.is_disposed());
    assert!(grandchild.is_disposed());
}

struct CycleA(#[allow(dead_code)] Arc<CycleB>);
struct CycleB(#[allow(dead_code)] Arc<CycleC>);
struct CycleC(#[allow(dead_code)] Arc<CycleA>);

impl Injectable for CycleA {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(vec![Param::of::<CycleB>("b")], |args| Ok(CycleA(args.shared()?)))
    }
}

impl Injectable for CycleB {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(vec![Param::of::<CycleC>("c")], |args| Ok(CycleB(args.shared()?)))
    }
}

impl Injectable for CycleC {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(vec![Param::of::<CycleA>("a")], |args| Ok(CycleC(args.shared()?)))
    }
}

#[test]
fn cycle_is_reported_instead_of_overflowing() {
    let root = Container::with_max_depth(16);
    root.register::<CycleA>().unwrap();
    root.register::<CycleB>().unwrap();
    root.register::<CycleC>().unwrap();

    let err = root.get::<CycleA>().err().unwrap();
    assert!(matches!(err, ContainerError::CircularDependency { .. }), "{err}");
    // The container stays usable after a failed resolution.
    root.register_instance(Settings("after"), None).unwrap();
    assert_eq!(root.get::<Settings>().unwrap().0, "after");
}

trait Format: Send + Sync {
    fn render(&self) -> String;
}

struct Json;
struct Yaml;

impl Format for Json {
    fn render(&self) -> String {
        "json".into()
    }
}

impl Format for Yaml {
    fn render(&self) -> String {
        "yaml".into()
    }
}

impl Injectable for Json {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Vec::new(), |_| Ok(Json))
    }
}

impl Injectable for Yaml {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Vec::new(), |_| Ok(Yaml))
    }
}

implements!(Json => dyn Format);
implements!(Yaml => dyn Format);

#[test]
fn named_bindings_select_and_most_recent_is_default() {
    let root = Container::new();
    root.register_as::<dyn Format, Json>(Some("f1")).unwrap();
    root.register_as::<dyn Format, Yaml>(Some("f2")).unwrap();

    assert_eq!(root.get_interface::<dyn Format>(Some("f1")).unwrap().render(), "json");
    assert_eq!(root.get_interface::<dyn Format>(Some("f2")).unwrap().render(), "yaml");
    assert_eq!(root.get_interface::<dyn Format>(None).unwrap().render(), "yaml");
    assert_eq!(root.get_interface::<dyn Format>(Some("f3")).unwrap().render(), "yaml");
}

#[test]
fn single_binding_ignores_requested_name() {
    let root = Container::new();
    root.register_as::<dyn Format, Json>(Some("f1")).unwrap();
    assert_eq!(root.get_interface::<dyn Format>(Some("other")).unwrap().render(), "json");
}

trait Animal: Send + Sync {
    fn speak(&self) -> &'static str;
}

#[derive(Default)]
struct Dog;

#[derive(Default)]
struct Person;

impl Animal for Dog {
    fn speak(&self) -> &'static str {
        "woof"
    }
}

impl Animal for Person {
    fn speak(&self) -> &'static str {
        "hello"
    }
}

impl Injectable for Dog {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::from_default()
    }
}

impl Injectable for Person {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::from_default()
    }
}

implements!(Dog => dyn Animal);
implements!(Person => dyn Animal);

#[test]
fn interface_follows_latest_while_concrete_stays_reachable() {
    let root = Container::new();
    root.register_as::<dyn Animal, Dog>(None).unwrap();
    root.register_as::<dyn Animal, Person>(None).unwrap();

    assert_eq!(root.get_interface::<dyn Animal>(None).unwrap().speak(), "hello");
    assert_eq!(root.get::<Dog>().unwrap().speak(), "woof");
    assert!(root.has::<Dog>(None));
    assert!(root.has_interface::<dyn Animal>(None));
}

#[test]
fn interface_and_concrete_share_one_singleton() {
    let root = Container::new();
    root.register_as::<dyn Animal, Dog>(None).unwrap();
    let concrete = root.get::<Dog>().unwrap();
    let as_animal = root.get_interface::<dyn Animal>(None).unwrap();
    assert_eq!(
        Arc::as_ptr(&concrete) as *const u8,
        Arc::as_ptr(&as_animal) as *const u8
    );
}

struct Owner {
    pet: Arc<dyn Animal>,
    label: Arc<String>,
}

impl Injectable for Owner {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new()
            .constructor(vec![Param::interface::<dyn Animal>("pet")], |args| {
                Ok(Owner {
                    pet: args.shared()?,
                    label: Arc::new(String::new()),
                })
            })
            .property(
                Param::of::<String>("label").or_value("unnamed".to_string()),
                |owner: &mut Owner, label: Arc<String>| owner.label = label,
            )
    }
}

#[test]
fn interface_parameters_and_properties_are_injected() {
    let root = Container::new();
    root.register_as::<dyn Animal, Dog>(None).unwrap();
    root.register::<Owner>().unwrap();

    let owner = root.get::<Owner>().unwrap();
    assert_eq!(owner.pet.speak(), "woof");
    assert_eq!(owner.label.as_str(), "unnamed");
}

static SLOW_BUILDS: AtomicUsize = AtomicUsize::new(0);

struct Slow;

impl Injectable for Slow {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Vec::new(), |_| {
            SLOW_BUILDS.fetch_add(1, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(20));
            Ok(Slow)
        })
    }
}

#[test]
fn concurrent_first_resolution_builds_once() {
    let root = Container::new();
    root.register::<Slow>().unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let root = Arc::clone(&root);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                root.get::<Slow>().unwrap()
            })
        })
        .collect();

    let instances: Vec<Arc<Slow>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(SLOW_BUILDS.load(Ordering::SeqCst), 1);
    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[test]
fn registered_instance_is_returned_verbatim() {
    let root = Container::new();
    let registered = root.register_instance(Settings("given"), None).unwrap();
    let child = root.create_container();
    assert!(Arc::ptr_eq(&registered, &child.get::<Settings>().unwrap()));
}
