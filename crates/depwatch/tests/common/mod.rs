//! Observable fixtures shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use depwatch::collection::COLLECTION_TYPE;
use depwatch::object::{MemberInfo, set_property};
use depwatch::{
    ComputedProperties, Expr, Object, ObservableCollection, PropertyChanged, Type, TypeInfo, Value,
};

// ── TestObject ────────────────────────────────────────────────────────────

static TEST_OBJECT_MEMBERS: [MemberInfo; 8] = [
    MemberInfo::property("Name", Type::Str),
    MemberInfo::property("Number", Type::Int),
    MemberInfo::property("Flag", Type::Bool),
    MemberInfo::property("Child", Type::Object(&TEST_OBJECT)),
    MemberInfo::readonly_field("Field", Type::Object(&TEST_PROPERTY)),
    MemberInfo::readonly_property("Strings", Type::Object(&COLLECTION_TYPE)),
    MemberInfo::readonly_property("Objects", Type::Object(&COLLECTION_TYPE)),
    MemberInfo::readonly_property("Double", Type::Int),
];
pub static TEST_OBJECT: TypeInfo = TypeInfo::observable("TestObject", &TEST_OBJECT_MEMBERS);

/// An observable object with scalar, object, collection and computed
/// members.
///
/// `Double` is backed by [`ComputedProperties`]; its watch keeps the object
/// alive until [`TestObject::dispose`] runs.
pub struct TestObject {
    name: RefCell<String>,
    number: RefCell<i64>,
    flag: RefCell<bool>,
    child: RefCell<Option<Rc<TestObject>>>,
    pub field: Rc<TestProperty>,
    pub strings: Rc<ObservableCollection>,
    pub objects: Rc<ObservableCollection>,
    changed: PropertyChanged,
    computed: ComputedProperties,
    this: Weak<TestObject>,
}

impl TestObject {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let owner = this.clone();
            Self {
                name: RefCell::new(String::new()),
                number: RefCell::new(0),
                flag: RefCell::new(false),
                child: RefCell::new(None),
                field: TestProperty::new(),
                strings: ObservableCollection::new(),
                objects: ObservableCollection::new(),
                changed: PropertyChanged::new(),
                computed: ComputedProperties::new(move |name| {
                    if let Some(owner) = owner.upgrade() {
                        owner.changed.raise(name);
                    }
                }),
                this: this.clone(),
            }
        })
    }

    pub fn with_child() -> Rc<Self> {
        let object = Self::new();
        object.set_child(Some(Self::new()));
        object
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn number(&self) -> i64 {
        *self.number.borrow()
    }

    pub fn child(&self) -> Option<Rc<TestObject>> {
        self.child.borrow().clone()
    }

    pub fn set_name(&self, value: &str) {
        set_property(&self.changed, &self.name, value.to_string(), "Name");
    }

    pub fn set_number(&self, value: i64) {
        set_property(&self.changed, &self.number, value, "Number");
    }

    pub fn set_flag(&self, value: bool) {
        set_property(&self.changed, &self.flag, value, "Flag");
    }

    pub fn set_child(&self, value: Option<Rc<TestObject>>) {
        let same = match (&*self.child.borrow(), &value) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        *self.child.borrow_mut() = value;
        self.changed.raise("Child");
    }

    /// `Number * 2`, cached and refreshed through [`ComputedProperties`].
    pub fn double(&self) -> i64 {
        let Some(this) = self.this.upgrade() else {
            return 0;
        };
        self.computed
            .computed("Double", 0_i64, || Expr::object(&this).member("Number") * 2)
            .unwrap_or_default()
    }

    pub fn computed(&self) -> &ComputedProperties {
        &self.computed
    }

    pub fn property_changed_handlers(&self) -> usize {
        self.changed.handler_count()
    }

    pub fn dispose(&self) {
        self.computed.dispose();
    }
}

impl Object for TestObject {
    fn type_info(&self) -> &'static TypeInfo {
        &TEST_OBJECT
    }

    fn get(&self, member: &str) -> Option<Value> {
        match member {
            "Name" => Some(Value::from(self.name())),
            "Number" => Some(Value::Int(self.number())),
            "Flag" => Some(Value::Bool(*self.flag.borrow())),
            "Child" => Some(Value::from_option(self.child())),
            "Field" => Some(Value::object(Rc::clone(&self.field))),
            "Strings" => Some(Value::object(Rc::clone(&self.strings))),
            "Objects" => Some(Value::object(Rc::clone(&self.objects))),
            "Double" => Some(Value::Int(self.double())),
            _ => None,
        }
    }

    fn property_changed(&self) -> Option<&PropertyChanged> {
        Some(&self.changed)
    }
}

// ── TestProperty ──────────────────────────────────────────────────────────

static TEST_PROPERTY_MEMBERS: [MemberInfo; 2] = [
    MemberInfo::property("Number", Type::Int),
    MemberInfo::property("Child", Type::Object(&TEST_PROPERTY)),
];
pub static TEST_PROPERTY: TypeInfo = TypeInfo::observable("TestProperty", &TEST_PROPERTY_MEMBERS);

#[derive(Default)]
pub struct TestProperty {
    number: RefCell<i64>,
    child: RefCell<Option<Rc<TestProperty>>>,
    changed: PropertyChanged,
}

impl TestProperty {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn set_number(&self, value: i64) {
        set_property(&self.changed, &self.number, value, "Number");
    }

    pub fn set_child(&self, value: Option<Rc<TestProperty>>) {
        *self.child.borrow_mut() = value;
        self.changed.raise("Child");
    }
}

impl Object for TestProperty {
    fn type_info(&self) -> &'static TypeInfo {
        &TEST_PROPERTY
    }

    fn get(&self, member: &str) -> Option<Value> {
        match member {
            "Number" => Some(Value::Int(*self.number.borrow())),
            "Child" => Some(Value::from_option(self.child.borrow().clone())),
            _ => None,
        }
    }

    fn property_changed(&self) -> Option<&PropertyChanged> {
        Some(&self.changed)
    }
}

// ── Recorders ─────────────────────────────────────────────────────────────

/// A shared counter and a callback that bumps it.
pub fn counter() -> (Rc<std::cell::Cell<u32>>, impl Fn() + 'static) {
    let count = Rc::new(std::cell::Cell::new(0));
    let count_clone = Rc::clone(&count);
    (count, move || count_clone.set(count_clone.get() + 1))
}

/// A shared log of strings and a callback that appends to it.
pub fn path_log() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = Rc::clone(&log);
    (log, move |path: &str| log_clone.borrow_mut().push(path.to_string()))
}
