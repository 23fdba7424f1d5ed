use core::any;

/// Debug-build identity of the value type held in a task's result container.
///
/// Every task vtable records the `TypeInfo` of its output so that reading a
/// predecessor's container through an untyped pointer can be checked before
/// it turns into type confusion.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TypeInfo {
    // Represented as functions because `core::any::type_name` and
    // `core::any::TypeId::of` are not `const fn`s on stable; the vtables that
    // embed a `TypeInfo` are consts.
    #[cfg(debug_assertions)]
    id: fn() -> any::TypeId,
    name: fn() -> &'static str,
}

impl TypeInfo {
    pub(crate) const fn of<T: 'static>() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: any::TypeId::of::<T>,
            name: any::type_name::<T>,
        }
    }

    #[cfg(debug_assertions)]
    #[inline]
    #[track_caller]
    pub(crate) fn assert_matches<T: 'static>(self, what: &'static str) {
        assert_eq!(
            (self.id)(),
            any::TypeId::of::<T>(),
            "type confusion reading a task's {what}!\nexpected: `{}`\n   found: `{}`",
            any::type_name::<T>(),
            self.name(),
        );
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) fn assert_matches<T: 'static>(self, _: &'static str) {}

    #[allow(dead_code)]
    pub(crate) fn name(self) -> &'static str {
        (self.name)()
    }
}
