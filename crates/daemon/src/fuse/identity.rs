//! Maps request uids to the user names permissions are granted to.

use std::collections::HashMap;
use std::ffi::CStr;

use parking_lot::Mutex;

use common::Caller;

/// Largest `getpwuid_r` buffer tried before giving up.
const MAX_PASSWD_BUFFER: usize = 1 << 20;

/// Cached uid → [`Caller`] lookups. Uids without a passwd entry become their
/// decimal string.
#[derive(Debug, Default)]
pub struct Identities {
    known: Mutex<HashMap<u32, Caller>>,
}

impl Identities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn caller(&self, uid: u32) -> Caller {
        if let Some(caller) = self.known.lock().get(&uid) {
            return caller.clone();
        }
        let caller = Caller::new(user_name(uid).unwrap_or_else(|| uid.to_string()));
        tracing::debug!(uid, user = caller.user(), "resolved caller");
        self.known.lock().insert(uid, caller.clone());
        caller
    }

    /// Forget cached names, e.g. after the passwd database changed.
    pub fn clear(&self) {
        self.known.lock().clear();
    }
}

/// Login name for `uid` from the passwd database.
pub fn user_name(uid: u32) -> Option<String> {
    let mut buffer = vec![0u8; 1024];
    loop {
        // SAFETY: `passwd` is plain old data; `getpwuid_r` fills it with
        // pointers into `buffer`, which outlives every read below.
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut entry,
                buffer.as_mut_ptr().cast::<libc::c_char>(),
                buffer.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buffer.len() < MAX_PASSWD_BUFFER {
            let doubled = buffer.len() * 2;
            buffer.resize(doubled, 0);
            continue;
        }
        if rc != 0 || result.is_null() || entry.pw_name.is_null() {
            return None;
        }
        // SAFETY: a successful call leaves `pw_name` pointing at a
        // NUL-terminated string inside `buffer`.
        let name = unsafe { CStr::from_ptr(entry.pw_name) };
        return Some(name.to_string_lossy().into_owned());
    }
}
