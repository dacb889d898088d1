//! Scan targets: a host sequence, a port sequence, and an optional label.
//!
//! A [`Target`] is consumed by [`Target::iterate`], which walks the Cartesian
//! product `hosts × ports` lazily, hosts in the outer loop. Port sequences
//! yield each port at most once, as do host lists.
//!
//! Lazy sequences are pulled from at most once. When a second host exists, a
//! lazy port stream is cached while the first host walks it and replayed for
//! the hosts after it. Both the duplicate filter and the cache are bounded by
//! the 65535 distinct ports; once all of them have been seen the stream is not
//! pulled again. A stream that repeats a few ports forever without ending
//! never finishes its first pass.

use std::collections::HashSet;
use std::fmt;
use std::iter::{FusedIterator, Peekable};
use std::ops::{Range, RangeInclusive};
use std::sync::Arc;

use tracing::warn;

use crate::error::TargetError;

type HostStream = Box<dyn Iterator<Item = String> + Send>;
type PortStream = Box<dyn Iterator<Item = u16> + Send>;

/// Ordered host identifiers for a target.
pub struct Hosts(HostSource);

enum HostSource {
    List(Vec<String>),
    Lazy(HostStream),
}

impl Hosts {
    /// A finite host list. Blank entries are rejected; duplicates are dropped,
    /// keeping the first appearance.
    pub fn list<I, S>(hosts: I) -> Result<Self, TargetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
        if let Some(index) = hosts.iter().position(|h| h.trim().is_empty()) {
            return Err(TargetError::BlankHost { index });
        }
        let mut seen = HashSet::new();
        let hosts = hosts.into_iter().filter(|h| seen.insert(h.clone())).collect();
        Ok(Hosts(HostSource::List(hosts)))
    }

    /// A lazily produced, possibly infinite host stream. Blank entries are
    /// skipped during iteration; repeats are not filtered, since that would
    /// need unbounded memory.
    pub fn lazy<I>(hosts: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Hosts(HostSource::Lazy(Box::new(hosts.into_iter())))
    }

    fn len(&self) -> Option<u64> {
        match &self.0 {
            HostSource::List(hosts) => Some(hosts.len() as u64),
            HostSource::Lazy(_) => None,
        }
    }

    fn into_stream(self) -> HostStream {
        match self.0 {
            HostSource::List(hosts) => Box::new(hosts.into_iter()),
            HostSource::Lazy(stream) => Box::new(stream.filter(|host| {
                let keep = !host.trim().is_empty();
                if !keep {
                    warn!("skipping blank host in lazy host stream");
                }
                keep
            })),
        }
    }
}

impl fmt::Debug for Hosts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            HostSource::List(hosts) if hosts.len() <= 4 => f.debug_list().entries(hosts).finish(),
            HostSource::List(hosts) => write!(f, "[{}, .. {} hosts]", hosts[0], hosts.len()),
            HostSource::Lazy(_) => f.write_str("<lazy hosts>"),
        }
    }
}

/// Ordered TCP ports (1-65535) for a target.
pub struct Ports(PortSource);

enum PortSource {
    List(Vec<u16>),
    Range(RangeInclusive<u16>),
    Lazy(PortStream),
}

impl Ports {
    /// A finite port list in the given order, deduplicated by first
    /// appearance. Port 0 is rejected.
    pub fn list<I>(ports: I) -> Result<Self, TargetError>
    where
        I: IntoIterator<Item = u16>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for port in ports {
            if port == 0 {
                return Err(TargetError::ZeroPort);
            }
            if seen.insert(port) {
                out.push(port);
            }
        }
        Ok(Ports(PortSource::List(out)))
    }

    /// Inclusive range `start..=end`.
    pub fn range(start: u16, end: u16) -> Result<Self, TargetError> {
        if start > end {
            return Err(TargetError::InvertedRange { start, end });
        }
        if start == 0 {
            return Err(TargetError::ZeroPort);
        }
        Ok(Ports(PortSource::Range(start..=end)))
    }

    /// A lazily produced port stream. Port 0 and repeated ports are skipped
    /// during iteration, and the stream is not pulled again once all 65535
    /// ports have been yielded.
    pub fn lazy<I>(ports: I) -> Self
    where
        I: IntoIterator<Item = u16>,
        I::IntoIter: Send + 'static,
    {
        Ports(PortSource::Lazy(Box::new(ports.into_iter())))
    }

    fn len(&self) -> Option<u64> {
        match &self.0 {
            PortSource::List(ports) => Some(ports.len() as u64),
            PortSource::Range(range) => Some(u64::from(*range.end() - *range.start()) + 1),
            PortSource::Lazy(_) => None,
        }
    }
}

impl fmt::Debug for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            PortSource::List(ports) if ports.len() <= 8 => f.debug_list().entries(ports).finish(),
            PortSource::List(ports) => write!(f, "[{}, .. {} ports]", ports[0], ports.len()),
            PortSource::Range(range) => write!(f, "{}-{}", range.start(), range.end()),
            PortSource::Lazy(_) => f.write_str("<lazy ports>"),
        }
    }
}

/// Conversion into a validated [`Hosts`] sequence.
pub trait IntoHosts {
    fn into_hosts(self) -> Result<Hosts, TargetError>;
}

impl IntoHosts for Hosts {
    fn into_hosts(self) -> Result<Hosts, TargetError> {
        Ok(self)
    }
}

impl IntoHosts for &str {
    fn into_hosts(self) -> Result<Hosts, TargetError> {
        Hosts::list([self])
    }
}

impl IntoHosts for String {
    fn into_hosts(self) -> Result<Hosts, TargetError> {
        Hosts::list([self])
    }
}

impl<S: Into<String>> IntoHosts for Vec<S> {
    fn into_hosts(self) -> Result<Hosts, TargetError> {
        Hosts::list(self)
    }
}

impl<S: Into<String> + Clone> IntoHosts for &[S] {
    fn into_hosts(self) -> Result<Hosts, TargetError> {
        Hosts::list(self.iter().cloned())
    }
}

impl<S: Into<String>, const N: usize> IntoHosts for [S; N] {
    fn into_hosts(self) -> Result<Hosts, TargetError> {
        Hosts::list(self)
    }
}

/// Conversion into a validated [`Ports`] sequence.
pub trait IntoPorts {
    fn into_ports(self) -> Result<Ports, TargetError>;
}

impl IntoPorts for Ports {
    fn into_ports(self) -> Result<Ports, TargetError> {
        Ok(self)
    }
}

impl IntoPorts for u16 {
    fn into_ports(self) -> Result<Ports, TargetError> {
        Ports::list([self])
    }
}

impl IntoPorts for Vec<u16> {
    fn into_ports(self) -> Result<Ports, TargetError> {
        Ports::list(self)
    }
}

impl IntoPorts for &[u16] {
    fn into_ports(self) -> Result<Ports, TargetError> {
        Ports::list(self.iter().copied())
    }
}

impl<const N: usize> IntoPorts for [u16; N] {
    fn into_ports(self) -> Result<Ports, TargetError> {
        Ports::list(self)
    }
}

impl IntoPorts for RangeInclusive<u16> {
    fn into_ports(self) -> Result<Ports, TargetError> {
        Ports::range(*self.start(), *self.end())
    }
}

impl IntoPorts for Range<u16> {
    fn into_ports(self) -> Result<Ports, TargetError> {
        match (self.start, self.end) {
            (start, end) if start > end => Err(TargetError::InvertedRange { start, end }),
            (start, end) if start == end => Ports::list([]),
            (0, _) => Err(TargetError::ZeroPort),
            (start, end) => Ports::range(start, end - 1),
        }
    }
}

/// One scan unit. Immutable once built; consumed by [`Target::iterate`].
#[derive(Debug)]
pub struct Target {
    hosts: Hosts,
    ports: Ports,
    label: Option<String>,
}

impl Target {
    pub fn new(hosts: impl IntoHosts, ports: impl IntoPorts) -> Result<Self, TargetError> {
        Ok(Self {
            hosts: hosts.into_hosts()?,
            ports: ports.into_ports()?,
            label: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Number of pairs this target yields, when both sequences are finite.
    pub fn pair_count(&self) -> Option<u64> {
        Some(self.hosts.len()? * self.ports.len()?)
    }

    pub fn iterate(self) -> Pairs {
        Pairs {
            hosts: self.hosts.into_stream().peekable(),
            ports: PortCursor::new(self.ports),
            host: None,
            done: false,
        }
    }
}

/// Distinct valid TCP ports; a lazy stream can't yield more than this.
const MAX_DISTINCT_PORTS: usize = u16::MAX as usize;

enum PortCursor {
    List {
        ports: Vec<u16>,
        pos: usize,
    },
    Range {
        range: RangeInclusive<u16>,
        pending: RangeInclusive<u16>,
    },
    Lazy {
        source: Option<PortStream>,
        seen: HashSet<u16>,
        /// Ports in stream order, kept only when more than one host will walk them.
        replay: Option<Vec<u16>>,
        pos: usize,
    },
}

impl PortCursor {
    fn new(ports: Ports) -> Self {
        match ports.0 {
            PortSource::List(ports) => PortCursor::List { ports, pos: 0 },
            PortSource::Range(range) => PortCursor::Range {
                pending: range.clone(),
                range,
            },
            PortSource::Lazy(stream) => PortCursor::Lazy {
                source: Some(stream),
                seen: HashSet::new(),
                replay: None,
                pos: 0,
            },
        }
    }

    /// True until the first pass over a lazy stream has started.
    fn wants_lookahead(&self) -> bool {
        matches!(self, PortCursor::Lazy { source: Some(_), seen, replay: None, .. } if seen.is_empty())
    }

    fn keep_for_replay(&mut self) {
        if let PortCursor::Lazy { replay, .. } = self {
            *replay = Some(Vec::new());
        }
    }

    fn rewind(&mut self) {
        match self {
            PortCursor::List { pos, .. } | PortCursor::Lazy { pos, .. } => *pos = 0,
            PortCursor::Range { range, pending } => *pending = range.clone(),
        }
    }

    fn next(&mut self) -> Option<u16> {
        match self {
            PortCursor::List { ports, pos } => {
                let port = ports.get(*pos).copied()?;
                *pos += 1;
                Some(port)
            }
            PortCursor::Range { pending, .. } => pending.next(),
            PortCursor::Lazy {
                source,
                seen,
                replay,
                pos,
            } => {
                let Some(stream) = source.as_mut() else {
                    let port = replay.as_ref()?.get(*pos).copied()?;
                    *pos += 1;
                    return Some(port);
                };
                loop {
                    if seen.len() == MAX_DISTINCT_PORTS {
                        *source = None;
                        return None;
                    }
                    match stream.next() {
                        Some(0) => warn!("skipping port 0 in lazy port stream"),
                        Some(port) if !seen.insert(port) => {}
                        Some(port) => {
                            if let Some(cache) = replay.as_mut() {
                                cache.push(port);
                            }
                            return Some(port);
                        }
                        None => {
                            *source = None;
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// True once it is known that a full pass yields no ports.
    fn is_empty(&self) -> bool {
        match self {
            PortCursor::List { ports, .. } => ports.is_empty(),
            PortCursor::Range { range, .. } => range.is_empty(),
            PortCursor::Lazy { source, seen, .. } => source.is_none() && seen.is_empty(),
        }
    }
}

/// Lazy `hosts × ports` enumerator returned by [`Target::iterate`].
pub struct Pairs {
    hosts: Peekable<HostStream>,
    ports: PortCursor,
    host: Option<Arc<str>>,
    done: bool,
}

impl Iterator for Pairs {
    type Item = (Arc<str>, u16);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.host.is_none() {
                match self.hosts.next() {
                    Some(host) => {
                        if self.ports.wants_lookahead() && self.hosts.peek().is_some() {
                            self.ports.keep_for_replay();
                        }
                        self.ports.rewind();
                        self.host = Some(Arc::from(host));
                    }
                    None => {
                        self.done = true;
                        return None;
                    }
                }
            }
            if let Some(port) = self.ports.next() {
                return self.host.clone().map(|host| (host, port));
            }
            self.host = None;
            // no ports at all: don't keep pulling an unbounded host stream
            if self.ports.is_empty() {
                self.done = true;
            }
        }
        None
    }
}

impl FusedIterator for Pairs {}

/// Caller-owned collection of targets, in insertion order.
///
/// Labels act as keys: inserting a labelled target replaces the earlier
/// target with the same label. Unlabelled targets are always appended.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a target, returning the one it replaced, if any.
    pub fn insert(&mut self, target: Target) -> Option<Target> {
        if let Some(label) = target.label() {
            if let Some(slot) = self.targets.iter_mut().find(|t| t.label() == Some(label)) {
                return Some(std::mem::replace(slot, target));
            }
        }
        self.targets.push(target);
        None
    }

    pub fn remove(&mut self, label: &str) -> Option<Target> {
        let index = self.targets.iter().position(|t| t.label() == Some(label))?;
        Some(self.targets.remove(index))
    }

    pub fn get(&self, label: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.label() == Some(label))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().filter_map(Target::label)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl IntoIterator for TargetRegistry {
    type Item = Target;
    type IntoIter = std::vec::IntoIter<Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.into_iter()
    }
}

impl Extend<Target> for TargetRegistry {
    fn extend<I: IntoIterator<Item = Target>>(&mut self, iter: I) {
        for target in iter {
            self.insert(target);
        }
    }
}

impl FromIterator<Target> for TargetRegistry {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        let mut registry = Self::new();
        registry.extend(iter);
        registry
    }
}
