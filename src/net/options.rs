//! Socket option sets.
//!
//! # Responsibilities
//! - Hold the common options every listener gets
//! - Merge transport-specific options on top (transport wins on collision)
//! - Apply the effective set to listening sockets and accepted streams
//!
//! # Design Decisions
//! - Keyed map, ordered by option, so the effective set is deterministic
//! - Values are untyped at rest and checked by `validate` before binding

use std::collections::btree_map::{self, BTreeMap};
use std::io;
use std::time::Duration;

use socket2::{SockRef, Socket};
use tokio::net::TcpStream;

/// Listen backlog applied to every listener.
pub const DEFAULT_BACKLOG: i32 = 128;

/// Linger value meaning "disabled".
pub const LINGER_DISABLED: i32 = -1;

/// Defer-accept value emitted by the epoll transport (explicitly set, effectively off).
pub const DEFER_ACCEPT_DISABLED: i32 = -1;

/// Option names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SocketOption {
    Backlog,
    Linger,
    NoDelay,
    KeepAlive,
    TcpDeferAccept,
}

impl SocketOption {
    fn expects_int(&self) -> bool {
        matches!(
            self,
            SocketOption::Backlog | SocketOption::Linger | SocketOption::TcpDeferAccept
        )
    }
}

/// Option values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Int(i32),
    Bool(bool),
}

/// A mapping from option name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketOptionSet {
    options: BTreeMap<SocketOption, OptionValue>,
}

impl SocketOptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backlog 128, linger disabled, no-delay on, keep-alive on.
    pub fn common() -> Self {
        Self::new()
            .with(SocketOption::Backlog, OptionValue::Int(DEFAULT_BACKLOG))
            .with(SocketOption::Linger, OptionValue::Int(LINGER_DISABLED))
            .with(SocketOption::NoDelay, OptionValue::Bool(true))
            .with(SocketOption::KeepAlive, OptionValue::Bool(true))
    }

    /// `common` followed by `transport`; transport values take precedence.
    pub fn effective(common: &SocketOptionSet, transport: &SocketOptionSet) -> Self {
        let mut merged = common.clone();
        merged.options.extend(transport.iter());
        merged
    }

    pub fn with(mut self, option: SocketOption, value: OptionValue) -> Self {
        self.insert(option, value);
        self
    }

    pub fn insert(&mut self, option: SocketOption, value: OptionValue) -> Option<OptionValue> {
        self.options.insert(option, value)
    }

    pub fn get(&self, option: SocketOption) -> Option<OptionValue> {
        self.options.get(&option).copied()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SocketOption, OptionValue)> + '_ {
        self.options.iter().map(|(k, v)| (*k, *v))
    }

    /// Listen backlog, falling back to the default when unset.
    pub fn backlog(&self) -> i32 {
        match self.get(SocketOption::Backlog) {
            Some(OptionValue::Int(n)) => n,
            _ => DEFAULT_BACKLOG,
        }
    }

    /// Reject values of the wrong type and a non-positive backlog.
    pub fn validate(&self) -> Result<(), String> {
        for (option, value) in self.iter() {
            let is_int = matches!(value, OptionValue::Int(_));
            if option.expects_int() != is_int {
                return Err(format!("{option:?} has a value of the wrong type: {value:?}"));
            }
        }
        if self.backlog() <= 0 {
            return Err(format!("backlog must be positive, got {}", self.backlog()));
        }
        Ok(())
    }

    /// Apply everything except the backlog (which belongs to `listen`).
    pub fn apply_to_listener(&self, socket: &Socket) -> io::Result<()> {
        for (option, value) in self.iter() {
            match (option, value) {
                (SocketOption::Backlog, _) => {}
                (SocketOption::Linger, OptionValue::Int(secs)) => socket.set_linger(linger(secs))?,
                (SocketOption::NoDelay, OptionValue::Bool(on)) => socket.set_tcp_nodelay(on)?,
                (SocketOption::KeepAlive, OptionValue::Bool(on)) => socket.set_keepalive(on)?,
                (SocketOption::TcpDeferAccept, OptionValue::Int(secs)) => set_defer_accept(socket, secs)?,
                (option, value) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{option:?} has a value of the wrong type: {value:?}"),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Apply the per-connection subset to an accepted stream.
    pub fn apply_to_stream(&self, stream: &TcpStream) -> io::Result<()> {
        if let Some(OptionValue::Bool(on)) = self.get(SocketOption::NoDelay) {
            stream.set_nodelay(on)?;
        }
        if let Some(OptionValue::Bool(on)) = self.get(SocketOption::KeepAlive) {
            SockRef::from(stream).set_keepalive(on)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a SocketOptionSet {
    type Item = (&'a SocketOption, &'a OptionValue);
    type IntoIter = btree_map::Iter<'a, SocketOption, OptionValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.options.iter()
    }
}

fn linger(secs: i32) -> Option<Duration> {
    u64::try_from(secs).ok().map(Duration::from_secs)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_defer_accept(socket: &Socket, secs: i32) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let value: libc::c_int = secs;
    // SAFETY: the fd is owned by `socket` for the duration of the call and the
    // option value points at a live c_int of the advertised length.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_DEFER_ACCEPT,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_defer_accept(_socket: &Socket, secs: i32) -> io::Result<()> {
    tracing::debug!(value = secs, "TCP_DEFER_ACCEPT not supported on this platform, ignoring");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_set_has_fixed_values() {
        let common = SocketOptionSet::common();
        assert_eq!(common.len(), 4);
        assert_eq!(common.get(SocketOption::Backlog), Some(OptionValue::Int(128)));
        assert_eq!(common.get(SocketOption::Linger), Some(OptionValue::Int(-1)));
        assert_eq!(common.get(SocketOption::NoDelay), Some(OptionValue::Bool(true)));
        assert_eq!(common.get(SocketOption::KeepAlive), Some(OptionValue::Bool(true)));
        assert!(common.validate().is_ok());
    }

    #[test]
    fn transport_values_take_precedence() {
        let transport = SocketOptionSet::new()
            .with(SocketOption::Backlog, OptionValue::Int(512))
            .with(SocketOption::TcpDeferAccept, OptionValue::Int(DEFER_ACCEPT_DISABLED));

        let effective = SocketOptionSet::effective(&SocketOptionSet::common(), &transport);
        assert_eq!(effective.len(), 5);
        assert_eq!(effective.backlog(), 512);
        assert_eq!(effective.get(SocketOption::TcpDeferAccept), Some(OptionValue::Int(-1)));
    }

    #[test]
    fn empty_transport_set_leaves_common_untouched() {
        let effective = SocketOptionSet::effective(&SocketOptionSet::common(), &SocketOptionSet::new());
        assert_eq!(effective, SocketOptionSet::common());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let wrong_type = SocketOptionSet::common().with(SocketOption::NoDelay, OptionValue::Int(1));
        assert!(wrong_type.validate().is_err());

        let zero_backlog = SocketOptionSet::common().with(SocketOption::Backlog, OptionValue::Int(0));
        assert!(zero_backlog.validate().is_err());
    }

    #[test]
    fn linger_disabled_maps_to_none() {
        assert_eq!(linger(LINGER_DISABLED), None);
        assert_eq!(linger(5), Some(Duration::from_secs(5)));
    }
}
