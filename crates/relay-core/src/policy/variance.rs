//! Variance rules and match accuracy.
//!
//! Lower accuracy is a better match:
//!
//! | Match | Accuracy |
//! |-------|----------|
//! | same key | 0 |
//! | `n` supertype steps apart | n |
//! | open generic method | + [`GENERIC_PENALTY`] |
//! | method or request of the top type | [`ANY_ACCURACY`] |

use crate::foundation::{Bindings, Key, TypeKey, TypeParam, unify};

/// Added to matches against open generic methods.
pub const GENERIC_PENALTY: u32 = 1_000;

/// Accuracy of matches made through the top type.
pub const ANY_ACCURACY: u32 = 10_000;

/// How a callback key relates to a method key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variance {
    /// A method declared for a supertype of the key services it.
    Contravariant,
    /// A method producing a subtype of the requested type services it.
    Covariant,
    /// Contravariant on the input, covariant on the output of a
    /// [`Key::Pair`].
    Bivariant,
    /// Keys must be equal.
    Invariant,
}

/// A successful match of a callback key against a method key.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Lower is better.
    pub accuracy: u32,
    /// Generic parameters bound by the match.
    pub bindings: Bindings,
}

impl Variance {
    /// Matches `callback` against a method declared with `method` and
    /// generic `params`.
    ///
    /// Every parameter must end up bound and satisfy its bound.
    pub fn matches(self, callback: &Key, method: &Key, params: &[TypeParam]) -> Option<Match> {
        let mut bindings = Bindings::new();
        let accuracy = match (self, callback, method) {
            (_, Key::Name(a), Key::Name(b)) => (a == b).then_some(0)?,
            (Self::Invariant, Key::Type(k), Key::Type(m)) => unify(m, k, &mut bindings).then_some(0)?,
            (Self::Contravariant, Key::Type(k), Key::Type(m)) => contravariant(k, m, &mut bindings)?,
            (Self::Covariant, Key::Type(k), Key::Type(m)) => covariant(k, m, &mut bindings)?,
            (Self::Bivariant, Key::Pair(ki, ko), Key::Pair(mi, mo)) => {
                let input = contravariant(ki, mi, &mut bindings)?;
                let output = covariant(ko, mo, &mut bindings)?;
                input.saturating_add(output)
            }
            (Self::Invariant, Key::Pair(ki, ko), Key::Pair(mi, mo)) => {
                (unify(mi, ki, &mut bindings) && unify(mo, ko, &mut bindings)).then_some(0)?
            }
            _ => return None,
        };
        if !params.iter().all(|p| p.is_satisfied(&bindings)) {
            return None;
        }
        let penalty = if method.is_open() { GENERIC_PENALTY } else { 0 };
        Some(Match {
            accuracy: accuracy.saturating_add(penalty),
            bindings,
        })
    }
}

/// The method accepts the callback key or one of its supertypes.
fn contravariant(key: &TypeKey, method: &TypeKey, bindings: &mut Bindings) -> Option<u32> {
    if method.is_any() {
        return Some(ANY_ACCURACY);
    }
    key.ancestors().into_iter().find_map(|(ancestor, distance)| {
        let mut trial = bindings.clone();
        unify(method, &ancestor, &mut trial).then(|| {
            *bindings = trial;
            distance
        })
    })
}

/// The method produces the requested type or one of its subtypes.
fn covariant(wanted: &TypeKey, method: &TypeKey, bindings: &mut Bindings) -> Option<u32> {
    if wanted.is_any() {
        return Some(ANY_ACCURACY);
    }
    method.ancestors().into_iter().find_map(|(ancestor, distance)| {
        let mut trial = bindings.clone();
        unify(&ancestor, wanted, &mut trial).then(|| {
            *bindings = trial;
            distance
        })
    })
}
