#![forbid(unsafe_code)]

//! Per-type cache of the property names deep watch descends into.
//!
//! The set of notify-capable properties of a type never changes at runtime,
//! so it is computed once per [`TypeInfo`] and shared afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::object::TypeInfo;

thread_local! {
    static NOTIFY_PROPERTIES: RefCell<AHashMap<*const TypeInfo, Rc<[&'static str]>>> =
        RefCell::new(AHashMap::new());
}

/// Names of the properties of `info` whose declared type raises property
/// or collection notifications. Indexers and fields are never included.
pub(crate) fn notify_properties(info: &'static TypeInfo) -> Rc<[&'static str]> {
    let key: *const TypeInfo = info;
    NOTIFY_PROPERTIES.with(|cache| {
        Rc::clone(cache.borrow_mut().entry(key).or_insert_with(|| {
            info.members
                .iter()
                .filter(|member| member.is_property() && member.ty.is_notify())
                .map(|member| member.name)
                .collect()
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::COLLECTION_TYPE;
    use crate::object::{MemberInfo, Type};

    static SHAPE_MEMBERS: [MemberInfo; 5] = [
        MemberInfo::property("Label", Type::Str),
        MemberInfo::property("Next", Type::Object(&SHAPE)),
        MemberInfo::readonly_property("Items", Type::Object(&COLLECTION_TYPE)),
        MemberInfo::readonly_field("Pinned", Type::Object(&SHAPE)),
        MemberInfo::indexer(Type::Object(&SHAPE)),
    ];
    static SHAPE: TypeInfo = TypeInfo::observable("Shape", &SHAPE_MEMBERS);

    #[test]
    fn only_notify_properties_are_listed() {
        assert_eq!(&*notify_properties(&SHAPE), &["Next", "Items"]);
    }

    #[test]
    fn repeated_lookups_share_the_entry() {
        let first = notify_properties(&SHAPE);
        let second = notify_properties(&SHAPE);
        assert!(Rc::ptr_eq(&first, &second));
    }
}
