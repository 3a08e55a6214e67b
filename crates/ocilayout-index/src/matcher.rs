//! Descriptor matchers used to select index entries.

use std::fmt;

use ocilayout_types::{Descriptor, Digest, ANNOTATION_REF_NAME};

/// A side-effect free predicate over descriptors.
///
/// Matchers are plain data: cloneable, comparable, printable, and safe to
/// share across threads. Combine them with [`and`](Self::and),
/// [`or`](Self::or) and [`not`](Self::not).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorMatcher {
    /// Matches every descriptor.
    Every,
    /// Matches descriptors with the same digest, size and media type as the
    /// target. Annotations are ignored.
    Equal(Descriptor),
    /// Matches descriptors with this digest.
    Digest(Digest),
    /// Matches descriptors with this media type.
    MediaType(String),
    /// Matches descriptors whose `org.opencontainers.image.ref.name` is this value.
    RefName(String),
    /// Matches descriptors carrying this annotation key with this value.
    Annotation { key: String, value: String },
    /// Matches when every inner matcher matches. Empty matches everything.
    And(Vec<DescriptorMatcher>),
    /// Matches when any inner matcher matches. Empty matches nothing.
    Or(Vec<DescriptorMatcher>),
    /// Inverts the inner matcher.
    Not(Box<DescriptorMatcher>),
}

impl DescriptorMatcher {
    /// Equality on identity fields.
    pub fn equal(target: &Descriptor) -> Self {
        Self::Equal(target.clone())
    }

    pub fn ref_name(name: impl Into<String>) -> Self {
        Self::RefName(name.into())
    }

    pub fn media_type(media_type: impl Into<String>) -> Self {
        Self::MediaType(media_type.into())
    }

    pub fn annotation(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Annotation {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Conjunction with another matcher, flattening nested `And`s.
    pub fn and(self, other: DescriptorMatcher) -> Self {
        match self {
            Self::And(mut inner) => {
                inner.push(other);
                Self::And(inner)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction with another matcher, flattening nested `Or`s.
    pub fn or(self, other: DescriptorMatcher) -> Self {
        match self {
            Self::Or(mut inner) => {
                inner.push(other);
                Self::Or(inner)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Evaluate the predicate.
    pub fn matches(&self, desc: &Descriptor) -> bool {
        match self {
            Self::Every => true,
            Self::Equal(target) => target.same_identity(desc),
            Self::Digest(digest) => &desc.digest == digest,
            Self::MediaType(media_type) => &desc.media_type == media_type,
            Self::RefName(name) => desc.annotation(ANNOTATION_REF_NAME) == Some(name.as_str()),
            Self::Annotation { key, value } => desc.annotation(key) == Some(value.as_str()),
            Self::And(inner) => inner.iter().all(|m| m.matches(desc)),
            Self::Or(inner) => inner.iter().any(|m| m.matches(desc)),
            Self::Not(inner) => !inner.matches(desc),
        }
    }
}

impl fmt::Display for DescriptorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every => f.write_str("*"),
            Self::Equal(d) => write!(f, "{}@{}({})", d.media_type, d.digest, d.size),
            Self::Digest(d) => write!(f, "digest={d}"),
            Self::MediaType(m) => write!(f, "mediaType={m}"),
            Self::RefName(n) => write!(f, "ref={n}"),
            Self::Annotation { key, value } => write!(f, "{key}={value}"),
            Self::And(inner) => write_joined(f, inner, " && "),
            Self::Or(inner) => write_joined(f, inner, " || "),
            Self::Not(inner) => write!(f, "!({inner})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, inner: &[DescriptorMatcher], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, m) in inner.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{m}")?;
    }
    f.write_str(")")
}
