//! C ABI over the process-wide [`REGISTRY`].
//!
//! Handles given to C are registry tokens disguised as pointers, never
//! addresses of Rust values, so stale or forged handles are detected.
//! Strings passed in are borrowed for the duration of the call only and
//! copied before use.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;

use crate::errors::ErrorCode;
use crate::registry::Handle;
use crate::thing::{AccessType, ThingAttr, Topic};
use crate::{initialize, Result, SafeThingError, REGISTRY};

pub const ABI_VERSION: u32 = 1;

pub type SafeThingHandle = *mut c_void;

/// One attribute as laid out by the bindings: two consecutive C strings.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FfiThingAttr {
    pub attr: *const c_char,
    pub value: *const c_char,
}

/// One topic: its name and who may use it (`0` the thing, `1` owner,
/// `2` group, `3` anyone).
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FfiTopic {
    pub name: *const c_char,
    pub access: i32,
}

#[no_mangle]
pub extern "C" fn safe_thing_api_version() -> u32 {
    ABI_VERSION
}

/// Create a thing and return its handle, or null on failure.
///
/// # Safety
/// `thing_id` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn safe_thing_new(
    thing_id: *const c_char,
) -> SafeThingHandle {
    initialize();
    guarded(
        "safe_thing_new",
        |_| std::ptr::null_mut(),
        || {
            let thing_id = read_str(thing_id, "thing_id")?;
            let handle = REGISTRY.create(thing_id)?;
            into_ptr(handle)
        },
    )
}

/// Replace the attributes of a thing with `attrs_len` records.
///
/// # Safety
/// `attrs` must point to `attrs_len` valid [`FfiThingAttr`] records whose
/// strings are NUL-terminated, or be null when `attrs_len` is zero.
#[no_mangle]
pub unsafe extern "C" fn safe_thing_register_thing(
    handle: SafeThingHandle,
    attrs: *const FfiThingAttr,
    attrs_len: usize,
) -> i32 {
    status(guarded("safe_thing_register_thing", error_code, || {
        let handle = from_ptr(handle)?;
        let attrs = read_attrs(attrs, attrs_len)?;
        REGISTRY.register_attributes(handle, attrs)?;
        Ok(ErrorCode::Success)
    }))
}

/// Replace the topics of a thing with `topics_len` records, keeping its
/// attributes.
///
/// # Safety
/// `topics` must point to `topics_len` valid [`FfiTopic`] records whose
/// names are NUL-terminated, or be null when `topics_len` is zero.
#[no_mangle]
pub unsafe extern "C" fn safe_thing_register_topics(
    handle: SafeThingHandle,
    topics: *const FfiTopic,
    topics_len: usize,
) -> i32 {
    status(guarded("safe_thing_register_topics", error_code, || {
        let handle = from_ptr(handle)?;
        let topics = read_topics(topics, topics_len)?;
        REGISTRY.register_topics(handle, topics)?;
        Ok(ErrorCode::Success)
    }))
}

/// Publish a registered thing under the identifier it was created with.
///
/// # Safety
/// `thing_id` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn safe_thing_publish_thing(
    handle: SafeThingHandle,
    thing_id: *const c_char,
) -> i32 {
    status(guarded("safe_thing_publish_thing", error_code, || {
        let handle = from_ptr(handle)?;
        let thing_id = read_str(thing_id, "thing_id")?;
        REGISTRY.publish(handle, thing_id)?;
        Ok(ErrorCode::Success)
    }))
}

/// Record an event on a topic of a published thing.
///
/// # Safety
/// `topic` and `data` must be null or point to NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn safe_thing_notify(
    handle: SafeThingHandle,
    topic: *const c_char,
    data: *const c_char,
) -> i32 {
    status(guarded("safe_thing_notify", error_code, || {
        let handle = from_ptr(handle)?;
        let topic = read_str(topic, "topic")?;
        let data = read_str(data, "data")?;
        REGISTRY.notify(handle, topic, data)?;
        Ok(ErrorCode::Success)
    }))
}

/// Follow `topic` of the published thing `thing_id`.
///
/// # Safety
/// `thing_id` and `topic` must be null or point to NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn safe_thing_subscribe(
    handle: SafeThingHandle,
    thing_id: *const c_char,
    topic: *const c_char,
) -> i32 {
    status(guarded("safe_thing_subscribe", error_code, || {
        let handle = from_ptr(handle)?;
        let thing_id = read_str(thing_id, "thing_id")?;
        let topic = read_str(topic, "topic")?;
        REGISTRY.subscribe(handle, thing_id, topic)?;
        Ok(ErrorCode::Success)
    }))
}

/// Lifecycle status of a thing (`0` unregistered, `1` registered,
/// `2` published) or a negative error code.
#[no_mangle]
pub extern "C" fn safe_thing_status(handle: SafeThingHandle) -> i32 {
    guarded(
        "safe_thing_status",
        |e| e.code() as i32,
        || {
            let handle = from_ptr(handle)?;
            Ok(REGISTRY.status(handle)? as i32)
        },
    )
}

/// Release a thing. Null is ignored; an already released handle is only
/// logged.
#[no_mangle]
pub extern "C" fn safe_thing_delete(handle: SafeThingHandle) {
    if handle.is_null() {
        return;
    }
    guarded(
        "safe_thing_delete",
        |_| (),
        || REGISTRY.destroy(from_ptr(handle)?),
    )
}

fn into_ptr(handle: Handle) -> Result<SafeThingHandle> {
    let raw = usize::try_from(handle.raw()).map_err(|_| {
        SafeThingError::Other(anyhow::anyhow!(
            "handle {} does not fit a pointer",
            handle
        ))
    })?;
    Ok(raw as SafeThingHandle)
}

fn from_ptr(ptr: SafeThingHandle) -> Result<Handle> {
    let raw = ptr as usize as u64;
    Handle::from_raw(raw).ok_or(SafeThingError::InvalidHandle(raw))
}

unsafe fn read_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(SafeThingError::InvalidParameters(format!(
            "{} is null",
            name
        )));
    }
    Ok(CStr::from_ptr(ptr).to_str()?)
}

unsafe fn read_attrs(
    attrs: *const FfiThingAttr,
    attrs_len: usize,
) -> Result<Vec<ThingAttr>> {
    if attrs_len == 0 {
        return Ok(vec![]);
    }
    if attrs.is_null() {
        return Err(SafeThingError::InvalidParameters(format!(
            "attrs is null but attrs_len is {}",
            attrs_len
        )));
    }

    slice::from_raw_parts(attrs, attrs_len)
        .iter()
        .map(|record| {
            let attr = read_str(record.attr, "attr")?;
            let value = read_str(record.value, "value")?;
            Ok(ThingAttr::new(attr, value))
        })
        .collect()
}

unsafe fn read_topics(
    topics: *const FfiTopic,
    topics_len: usize,
) -> Result<Vec<Topic>> {
    if topics_len == 0 {
        return Ok(vec![]);
    }
    if topics.is_null() {
        return Err(SafeThingError::InvalidParameters(format!(
            "topics is null but topics_len is {}",
            topics_len
        )));
    }

    slice::from_raw_parts(topics, topics_len)
        .iter()
        .map(|record| {
            let name = read_str(record.name, "topic name")?;
            Ok(Topic::new(name, access_type(record.access)?))
        })
        .collect()
}

fn access_type(access: i32) -> Result<AccessType> {
    match access {
        0 => Ok(AccessType::Thing),
        1 => Ok(AccessType::Owner),
        2 => Ok(AccessType::Group),
        3 => Ok(AccessType::All),
        other => Err(SafeThingError::InvalidParameters(format!(
            "unknown access type {}",
            other
        ))),
    }
}

fn error_code(e: &SafeThingError) -> ErrorCode {
    e.code()
}

fn status(code: ErrorCode) -> i32 {
    code as i32
}

/// Run `call`, turning errors and panics into the value C expects.
fn guarded<R>(
    name: &str,
    on_error: impl FnOnce(&SafeThingError) -> R,
    call: impl FnOnce() -> Result<R>,
) -> R {
    let error = match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => return value,
        Ok(Err(e)) => {
            log::warn!("{} failed: {}", name, e);
            e
        }
        Err(_) => {
            log::error!("{} panicked", name);
            SafeThingError::Other(anyhow::anyhow!("{} panicked", name))
        }
    };
    on_error(&error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thing::ThingStatus;
    use std::ffi::CString;

    fn attr_records(strings: &[(CString, CString)]) -> Vec<FfiThingAttr> {
        strings
            .iter()
            .map(|(attr, value)| FfiThingAttr {
                attr: attr.as_ptr(),
                value: value.as_ptr(),
            })
            .collect()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(CString, CString)> {
        items
            .iter()
            .map(|(attr, value)| {
                (CString::new(*attr).unwrap(), CString::new(*value).unwrap())
            })
            .collect()
    }

    #[test]
    fn api_version() {
        assert_eq!(safe_thing_api_version(), ABI_VERSION);
    }

    #[test]
    fn full_lifecycle() {
        let id = CString::new("ffi-thingA_id").unwrap();
        let strings = pairs(&[("5", "67"), ("6", "68")]);
        let records = attr_records(&strings);

        unsafe {
            let handle = safe_thing_new(id.as_ptr());
            assert!(!handle.is_null());
            assert_eq!(
                safe_thing_status(handle),
                ThingStatus::Unregistered as i32
            );

            let code = safe_thing_register_thing(
                handle,
                records.as_ptr(),
                records.len(),
            );
            assert_eq!(code, 0);

            assert_eq!(safe_thing_publish_thing(handle, id.as_ptr()), 0);
            assert_eq!(
                safe_thing_status(handle),
                ThingStatus::Published as i32
            );
            safe_thing_delete(handle);

            assert_eq!(
                safe_thing_status(handle),
                ErrorCode::InvalidHandle as i32
            );
        }

        let info = REGISTRY
            .directory()
            .lookup("ffi-thingA_id")
            .unwrap()
            .unwrap();
        assert_eq!(
            info.attrs,
            vec![ThingAttr::new("5", "67"), ThingAttr::new("6", "68")]
        );
    }

    #[test]
    fn create_then_delete() {
        let id = CString::new("ffi-empty").unwrap();
        unsafe {
            let handle = safe_thing_new(id.as_ptr());
            assert!(!handle.is_null());
            safe_thing_delete(handle);
            // a second delete is detected and ignored
            safe_thing_delete(handle);
        }
    }

    #[test]
    fn invalid_construction_returns_null() {
        let empty = CString::new("").unwrap();
        unsafe {
            assert!(safe_thing_new(std::ptr::null()).is_null());
            assert!(safe_thing_new(empty.as_ptr()).is_null());
        }
    }

    #[test]
    fn dead_and_forged_handles_are_rejected() {
        let id = CString::new("ffi-dead").unwrap();
        let strings = pairs(&[("k", "v")]);
        let records = attr_records(&strings);
        let invalid = ErrorCode::InvalidHandle as i32;

        unsafe {
            let handle = safe_thing_new(id.as_ptr());
            safe_thing_delete(handle);

            assert_eq!(
                safe_thing_register_thing(handle, records.as_ptr(), 1),
                invalid
            );
            assert_eq!(safe_thing_publish_thing(handle, id.as_ptr()), invalid);

            let forged = usize::MAX as SafeThingHandle;
            assert_eq!(safe_thing_status(forged), invalid);
            assert_eq!(safe_thing_status(std::ptr::null_mut()), invalid);
        }
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let id = CString::new("ffi-malformed").unwrap();
        let other = CString::new("ffi-someone-else").unwrap();
        let invalid = ErrorCode::InvalidParameters as i32;
        let bad_utf8 = CString::new(vec![0xffu8, 0xfe]).unwrap();
        let good = CString::new("ok").unwrap();
        let records = [FfiThingAttr {
            attr: good.as_ptr(),
            value: bad_utf8.as_ptr(),
        }];
        let null_value = [FfiThingAttr {
            attr: good.as_ptr(),
            value: std::ptr::null(),
        }];

        unsafe {
            let handle = safe_thing_new(id.as_ptr());
            assert_eq!(
                safe_thing_register_thing(handle, std::ptr::null(), 2),
                invalid
            );
            assert_eq!(
                safe_thing_register_thing(handle, records.as_ptr(), 1),
                invalid
            );
            assert_eq!(
                safe_thing_register_thing(handle, null_value.as_ptr(), 1),
                invalid
            );
            assert_eq!(
                safe_thing_publish_thing(handle, id.as_ptr()),
                ErrorCode::InvalidStatus as i32
            );

            // an empty attribute set is a valid registration
            assert_eq!(
                safe_thing_register_thing(handle, std::ptr::null(), 0),
                0
            );
            assert_eq!(safe_thing_publish_thing(handle, other.as_ptr()), invalid);
            assert_eq!(
                safe_thing_publish_thing(handle, std::ptr::null()),
                invalid
            );
            assert_eq!(safe_thing_publish_thing(handle, id.as_ptr()), 0);
            safe_thing_delete(handle);
        }
    }

    #[test]
    fn notify_through_the_boundary() {
        let id = CString::new("ffi-notify").unwrap();
        let topic = CString::new("printRequested").unwrap();
        let data = CString::new("job 1").unwrap();

        unsafe {
            let handle = safe_thing_new(id.as_ptr());
            assert_eq!(
                safe_thing_notify(handle, topic.as_ptr(), data.as_ptr()),
                ErrorCode::InvalidStatus as i32
            );
            safe_thing_delete(handle);
        }
    }

    #[test]
    fn notify_after_registering_topics() {
        let id = CString::new("ffi-printer").unwrap();
        let watcher_id = CString::new("ffi-watcher").unwrap();
        let printed = CString::new("printRequested").unwrap();
        let ink = CString::new("outOfInk").unwrap();
        let unknown = CString::new("paperJam").unwrap();
        let data = CString::new("job 1").unwrap();
        let strings = pairs(&[("name", "printer")]);
        let records = attr_records(&strings);
        let topics = [
            FfiTopic {
                name: printed.as_ptr(),
                access: 3,
            },
            FfiTopic {
                name: ink.as_ptr(),
                access: 1,
            },
        ];

        unsafe {
            let handle = safe_thing_new(id.as_ptr());
            let watcher = safe_thing_new(watcher_id.as_ptr());
            assert_eq!(
                safe_thing_register_thing(handle, records.as_ptr(), 1),
                0
            );
            assert_eq!(
                safe_thing_register_topics(handle, topics.as_ptr(), 2),
                0
            );
            assert_eq!(
                safe_thing_status(handle),
                ThingStatus::Registered as i32
            );
            assert_eq!(safe_thing_publish_thing(handle, id.as_ptr()), 0);

            assert_eq!(
                safe_thing_subscribe(watcher, id.as_ptr(), printed.as_ptr()),
                0
            );
            assert_eq!(
                safe_thing_subscribe(watcher, id.as_ptr(), unknown.as_ptr()),
                ErrorCode::InvalidParameters as i32
            );

            assert_eq!(
                safe_thing_notify(handle, printed.as_ptr(), data.as_ptr()),
                0
            );
            assert_eq!(
                safe_thing_notify(handle, unknown.as_ptr(), data.as_ptr()),
                ErrorCode::InvalidParameters as i32
            );
            safe_thing_delete(watcher);
            safe_thing_delete(handle);
        }

        let info = REGISTRY
            .directory()
            .lookup("ffi-printer")
            .unwrap()
            .unwrap();
        assert_eq!(info.attrs, vec![ThingAttr::new("name", "printer")]);
        assert_eq!(info.topics[1], Topic::new("outOfInk", AccessType::Owner));
        assert_eq!(
            REGISTRY
                .directory()
                .topic_events("ffi-printer", "printRequested")
                .unwrap(),
            vec!["job 1"]
        );
        assert!(REGISTRY
            .directory()
            .subscriptions("ffi-watcher")
            .unwrap()["ffi-printer"]
            .contains("printRequested"));
    }

    #[test]
    fn malformed_topics_are_rejected() {
        let id = CString::new("ffi-bad-topics").unwrap();
        let name = CString::new("alarm").unwrap();
        let invalid = ErrorCode::InvalidParameters as i32;
        let bad_access = [FfiTopic {
            name: name.as_ptr(),
            access: 7,
        }];
        let null_name = [FfiTopic {
            name: std::ptr::null(),
            access: 0,
        }];

        unsafe {
            let handle = safe_thing_new(id.as_ptr());
            assert_eq!(
                safe_thing_register_topics(handle, std::ptr::null(), 1),
                invalid
            );
            assert_eq!(
                safe_thing_register_topics(handle, bad_access.as_ptr(), 1),
                invalid
            );
            assert_eq!(
                safe_thing_register_topics(handle, null_name.as_ptr(), 1),
                invalid
            );
            assert_eq!(
                safe_thing_status(handle),
                ThingStatus::Unregistered as i32
            );
            assert_eq!(
                safe_thing_register_topics(handle, std::ptr::null(), 0),
                0
            );
            safe_thing_delete(handle);
        }
    }

    #[test]
    fn panics_do_not_cross_the_boundary() {
        let code = guarded("boom", error_code, || -> Result<ErrorCode> {
            panic!("boom")
        });
        assert_eq!(code, ErrorCode::Internal);
    }
}
