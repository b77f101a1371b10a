//! Lightweight type descriptors used for variance matching.
//!
//! Dispatch does not rely on Rust generics to decide whether a method can
//! service a callback. Every participating type is described by a
//! [`TypeKey`]: a named node with declared supertypes, optionally generic.
//! Policies compare keys with the subtype and unification rules defined here.
//!
//! # Kinds
//!
//! | Kind | Example | Notes |
//! |------|---------|-------|
//! | top | `Any` | supertype of everything |
//! | nominal | `Dog : Animal` | identity is the name |
//! | definition | `Repository<T> : Store<T>` | open generic with named parameters |
//! | constructed | `Repository<Dog>` | definition applied to arguments |
//! | parameter | `T` | placeholder bound during unification |
//!
//! # Example
//!
//! ```rust,ignore
//! static ANIMAL: LazyLock<TypeKey> = LazyLock::new(|| TypeKey::nominal("Animal"));
//! static DOG: LazyLock<TypeKey> =
//!     LazyLock::new(|| TypeKey::derived("Dog", [ANIMAL.clone()]));
//!
//! assert!(DOG.is_subtype_of(&ANIMAL));
//! ```

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use super::value::AsAny;

static ANY: LazyLock<TypeKey> = LazyLock::new(|| TypeKey::from_node("Any", TypeKind::Any));

static RUST_TYPES: LazyLock<RwLock<HashMap<TypeId, TypeKey>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

// =============================================================================
// TypeKey
// =============================================================================

/// Runtime descriptor of a dispatchable type.
#[derive(Clone)]
pub struct TypeKey(Arc<TypeNode>);

struct TypeNode {
    name: Arc<str>,
    kind: TypeKind,
}

enum TypeKind {
    Any,
    Nominal {
        supertypes: Vec<TypeKey>,
    },
    Definition {
        params: Vec<Arc<str>>,
        supertypes: Vec<TypeKey>,
    },
    Constructed {
        definition: TypeKey,
        args: Vec<TypeKey>,
    },
    Parameter,
}

impl TypeKey {
    fn from_node(name: impl Into<Arc<str>>, kind: TypeKind) -> Self {
        Self(Arc::new(TypeNode {
            name: name.into(),
            kind,
        }))
    }

    /// The top type every other type conforms to.
    pub fn any() -> Self {
        ANY.clone()
    }

    /// A nominal type without supertypes.
    pub fn nominal(name: impl Into<Arc<str>>) -> Self {
        Self::derived(name, [])
    }

    /// A nominal type with the given direct supertypes.
    pub fn derived(name: impl Into<Arc<str>>, supertypes: impl IntoIterator<Item = TypeKey>) -> Self {
        Self::from_node(
            name,
            TypeKind::Nominal {
                supertypes: supertypes.into_iter().collect(),
            },
        )
    }

    /// An open generic definition.
    ///
    /// `supertypes` may mention the definition's parameters through
    /// [`TypeKey::param`]; they are substituted when the definition is
    /// constructed.
    pub fn definition<P>(
        name: impl Into<Arc<str>>,
        params: impl IntoIterator<Item = P>,
        supertypes: impl IntoIterator<Item = TypeKey>,
    ) -> Self
    where
        P: Into<Arc<str>>,
    {
        Self::from_node(
            name,
            TypeKind::Definition {
                params: params.into_iter().map(Into::into).collect(),
                supertypes: supertypes.into_iter().collect(),
            },
        )
    }

    /// A generic parameter placeholder.
    pub fn param(name: impl Into<Arc<str>>) -> Self {
        Self::from_node(name, TypeKind::Parameter)
    }

    /// Applies a generic definition to type arguments.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not a definition or the arity does not match.
    pub fn construct(&self, args: impl IntoIterator<Item = TypeKey>) -> Self {
        let args: Vec<TypeKey> = args.into_iter().collect();
        match &self.0.kind {
            TypeKind::Definition { params, .. } => assert_eq!(
                params.len(),
                args.len(),
                "'{}' expects {} type arguments",
                self.0.name,
                params.len()
            ),
            _ => panic!("'{}' is not a generic definition", self.0.name),
        }
        Self::from_node(
            self.0.name.clone(),
            TypeKind::Constructed {
                definition: self.clone(),
                args,
            },
        )
    }

    /// Returns the key registered for the Rust type `T`.
    ///
    /// Unregistered types get a nominal key named after `type_name::<T>()`,
    /// created once and cached.
    pub fn of<T: Any>() -> Self {
        let id = TypeId::of::<T>();
        if let Some(key) = RUST_TYPES.read().get(&id) {
            return key.clone();
        }
        let key = Self::nominal(std::any::type_name::<T>());
        RUST_TYPES.write().entry(id).or_insert(key).clone()
    }

    /// Associates `key` with the Rust type `T`, replacing any earlier key.
    pub fn register<T: Any>(key: TypeKey) {
        RUST_TYPES.write().insert(TypeId::of::<T>(), key);
    }

    /// The type's name, without type arguments.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Returns `true` for the top type.
    pub fn is_any(&self) -> bool {
        matches!(self.0.kind, TypeKind::Any)
    }

    /// Returns `true` for a generic parameter placeholder.
    pub fn is_param(&self) -> bool {
        matches!(self.0.kind, TypeKind::Parameter)
    }

    /// Returns `true` if the key mentions any generic parameter.
    pub fn is_open(&self) -> bool {
        match &self.0.kind {
            TypeKind::Parameter | TypeKind::Definition { .. } => true,
            TypeKind::Constructed { args, .. } => args.iter().any(TypeKey::is_open),
            _ => false,
        }
    }

    /// The generic definition of a constructed type.
    pub fn generic_definition(&self) -> Option<&TypeKey> {
        match &self.0.kind {
            TypeKind::Constructed { definition, .. } => Some(definition),
            _ => None,
        }
    }

    /// Type arguments of a constructed type, empty otherwise.
    pub fn args(&self) -> &[TypeKey] {
        match &self.0.kind {
            TypeKind::Constructed { args, .. } => args,
            _ => &[],
        }
    }

    /// Direct supertypes, with generic arguments substituted.
    pub fn supertypes(&self) -> Vec<TypeKey> {
        match &self.0.kind {
            TypeKind::Nominal { supertypes } | TypeKind::Definition { supertypes, .. } => {
                supertypes.clone()
            }
            TypeKind::Constructed { definition, args } => match &definition.0.kind {
                TypeKind::Definition { params, supertypes } => {
                    let bindings = Bindings(params.iter().cloned().zip(args.iter().cloned()).collect());
                    supertypes.iter().map(|s| s.substitute(&bindings)).collect()
                }
                _ => Vec::new(),
            },
            TypeKind::Any | TypeKind::Parameter => Vec::new(),
        }
    }

    /// The key itself followed by every transitive supertype, breadth first,
    /// each paired with its distance from `self`.
    pub fn ancestors(&self) -> Vec<(TypeKey, u32)> {
        let mut seen: Vec<(TypeKey, u32)> = vec![(self.clone(), 0)];
        let mut queue = VecDeque::from([(self.clone(), 0u32)]);
        while let Some((key, depth)) = queue.pop_front() {
            for parent in key.supertypes() {
                if seen.iter().any(|(k, _)| *k == parent) {
                    continue;
                }
                seen.push((parent.clone(), depth + 1));
                queue.push_back((parent, depth + 1));
            }
        }
        seen
    }

    /// Number of supertype steps from `self` to `ancestor`.
    pub fn distance_to(&self, ancestor: &TypeKey) -> Option<u32> {
        self.ancestors()
            .into_iter()
            .find(|(k, _)| k == ancestor)
            .map(|(_, d)| d)
    }

    /// Returns `true` if `self` conforms to `other`.
    pub fn is_subtype_of(&self, other: &TypeKey) -> bool {
        other.is_any() || self.distance_to(other).is_some()
    }

    /// Replaces bound parameters with their bindings.
    pub fn substitute(&self, bindings: &Bindings) -> TypeKey {
        match &self.0.kind {
            TypeKind::Parameter => bindings.get(&self.0.name).cloned().unwrap_or_else(|| self.clone()),
            TypeKind::Constructed { definition, args } => Self::from_node(
                self.0.name.clone(),
                TypeKind::Constructed {
                    definition: definition.clone(),
                    args: args.iter().map(|a| a.substitute(bindings)).collect(),
                },
            ),
            _ => self.clone(),
        }
    }

    fn tag(&self) -> u8 {
        match self.0.kind {
            TypeKind::Any => 0,
            TypeKind::Nominal { .. } => 1,
            TypeKind::Definition { .. } => 2,
            TypeKind::Constructed { .. } => 3,
            TypeKind::Parameter => 4,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&self.0.kind, &other.0.kind) {
            (TypeKind::Any, TypeKind::Any) => true,
            (TypeKind::Nominal { .. }, TypeKind::Nominal { .. })
            | (TypeKind::Definition { .. }, TypeKind::Definition { .. })
            | (TypeKind::Parameter, TypeKind::Parameter) => self.0.name == other.0.name,
            (
                TypeKind::Constructed {
                    definition: a,
                    args: x,
                },
                TypeKind::Constructed {
                    definition: b,
                    args: y,
                },
            ) => a == b && x == y,
            _ => false,
        }
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        self.0.name.hash(state);
        self.args().hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)?;
        let params: Vec<String> = match &self.0.kind {
            TypeKind::Constructed { args, .. } => args.iter().map(ToString::to_string).collect(),
            TypeKind::Definition { params, .. } => params.iter().map(|p| p.to_string()).collect(),
            _ => return Ok(()),
        };
        write!(f, "<{}>", params.join(", "))
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({self})")
    }
}

// =============================================================================
// Generic parameters and unification
// =============================================================================

/// Parameter bindings produced while unifying an open key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(Vec<(Arc<str>, TypeKey)>);

impl Bindings {
    /// Creates an empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// The type bound to `name`.
    pub fn get(&self, name: &str) -> Option<&TypeKey> {
        self.0.iter().find(|(n, _)| &**n == name).map(|(_, k)| k)
    }

    /// Binds `name`, keeping an existing binding.
    pub fn bind(&mut self, name: impl Into<Arc<str>>, key: TypeKey) {
        let name = name.into();
        if self.get(&name).is_none() {
            self.0.push((name, key));
        }
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(name, type)` pairs in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeKey)> {
        self.0.iter().map(|(n, k)| (&**n, k))
    }
}

/// A generic method parameter with an optional upper bound.
#[derive(Debug, Clone)]
pub struct TypeParam {
    name: Arc<str>,
    bound: Option<TypeKey>,
}

impl TypeParam {
    /// An unconstrained parameter.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            bound: None,
        }
    }

    /// Requires the bound argument to conform to `bound`.
    ///
    /// The bound may mention other parameters of the same method.
    pub fn bounded(mut self, bound: TypeKey) -> Self {
        self.bound = Some(bound);
        self
    }

    /// The parameter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the parameter is bound and satisfies its constraint.
    pub fn is_satisfied(&self, bindings: &Bindings) -> bool {
        let Some(arg) = bindings.get(&self.name) else {
            return false;
        };
        match &self.bound {
            Some(bound) => arg.is_subtype_of(&bound.substitute(bindings)),
            None => true,
        }
    }
}

/// Unifies an open `pattern` with a `concrete` key, extending `bindings`.
///
/// Parameters bind on first sight and must agree afterwards. Constructed
/// types unify argument by argument; arguments are invariant.
pub fn unify(pattern: &TypeKey, concrete: &TypeKey, bindings: &mut Bindings) -> bool {
    match (&pattern.0.kind, &concrete.0.kind) {
        (TypeKind::Parameter, _) => match bindings.get(&pattern.0.name) {
            Some(bound) => bound == concrete,
            None => {
                bindings.bind(pattern.0.name.clone(), concrete.clone());
                true
            }
        },
        (
            TypeKind::Constructed {
                definition: d1,
                args: a1,
            },
            TypeKind::Constructed {
                definition: d2,
                args: a2,
            },
        ) => {
            d1 == d2
                && a1.len() == a2.len()
                && a1.iter().zip(a2).all(|(p, c)| unify(p, c, bindings))
        }
        _ => pattern == concrete,
    }
}

// =============================================================================
// Keys
// =============================================================================

/// What a policy matches on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A described type.
    Type(TypeKey),
    /// A string key, matched by equality.
    Name(Arc<str>),
    /// An input and an output type, for bivariant policies.
    Pair(TypeKey, TypeKey),
}

impl Key {
    /// Key of the Rust type `T`.
    pub fn of<T: Typed>() -> Self {
        Self::Type(T::type_key())
    }

    /// A string key.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Self::Name(name.into())
    }

    /// Returns `true` if the key mentions generic parameters.
    pub fn is_open(&self) -> bool {
        match self {
            Self::Type(t) => t.is_open(),
            Self::Name(_) => false,
            Self::Pair(i, o) => i.is_open() || o.is_open(),
        }
    }
}

impl From<TypeKey> for Key {
    fn from(key: TypeKey) -> Self {
        Self::Type(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(t) => write!(f, "{t}"),
            Self::Name(n) => write!(f, "\"{n}\""),
            Self::Pair(i, o) => write!(f, "({i} -> {o})"),
        }
    }
}

// =============================================================================
// Typed values
// =============================================================================

/// A Rust type that can travel through dispatch.
///
/// The default key is [`TypeKey::of::<Self>()`](TypeKey::of). Override
/// `type_key` to declare supertypes:
///
/// ```rust,ignore
/// impl Typed for Dog {
///     fn type_key() -> TypeKey {
///         DOG.clone()
///     }
/// }
/// ```
pub trait Typed: Any + Send + Sync {
    /// The descriptor of this type.
    fn type_key() -> TypeKey
    where
        Self: Sized,
    {
        TypeKey::of::<Self>()
    }
}

/// Object-safe view of a [`Typed`] value.
pub trait Payload: AsAny + Send + Sync {
    /// The descriptor of the value's type.
    fn payload_key(&self) -> TypeKey;
}

impl<T: Typed> Payload for T {
    fn payload_key(&self) -> TypeKey {
        T::type_key()
    }
}

impl<'a> dyn Payload + 'a {
    /// Downcasts to a concrete payload type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

macro_rules! impl_typed {
    ($($ty:ty),* $(,)?) => {
        $(impl Typed for $ty {})*
    };
}

impl_typed!(String, bool, i32, i64, u32, u64, usize, f64);

#[cfg(test)]
mod tests {
    use super::*;

    fn animal() -> TypeKey {
        TypeKey::nominal("Animal")
    }

    fn dog() -> TypeKey {
        TypeKey::derived("Dog", [TypeKey::derived("Mammal", [animal()])])
    }

    #[test]
    fn test_ancestors_are_breadth_first() {
        let names: Vec<(String, u32)> = dog()
            .ancestors()
            .into_iter()
            .map(|(k, d)| (k.name().to_string(), d))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Dog".to_string(), 0),
                ("Mammal".to_string(), 1),
                ("Animal".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_subtype_relations() {
        let cat = TypeKey::derived("Cat", [animal()]);
        assert!(dog().is_subtype_of(&animal()));
        assert!(dog().is_subtype_of(&TypeKey::any()));
        assert!(!dog().is_subtype_of(&cat));
        assert!(!animal().is_subtype_of(&dog()));
    }

    #[test]
    fn test_constructed_supertypes_are_substituted() {
        let store = TypeKey::definition("Store", ["T"], []);
        let repo = TypeKey::definition(
            "Repository",
            ["T"],
            [store.construct([TypeKey::param("T")])],
        );
        let dogs = repo.construct([dog()]);
        assert_eq!(dogs.supertypes(), vec![store.construct([dog()])]);
        assert_eq!(dogs.to_string(), "Repository<Dog>");
        assert!(dogs.is_subtype_of(&store.construct([dog()])));
        assert!(!dogs.is_subtype_of(&store.construct([animal()])));
    }

    #[test]
    fn test_unify_binds_consistently() {
        let pair = TypeKey::definition("Pair", ["A", "B"], []);
        let pattern = pair.construct([TypeKey::param("T"), TypeKey::param("T")]);

        let mut bindings = Bindings::new();
        assert!(unify(&pattern, &pair.construct([dog(), dog()]), &mut bindings));
        assert_eq!(bindings.get("T"), Some(&dog()));

        let mut bindings = Bindings::new();
        assert!(!unify(&pattern, &pair.construct([dog(), animal()]), &mut bindings));
    }

    #[test]
    fn test_type_param_bounds() {
        let param = TypeParam::new("T").bounded(animal());
        let mut bindings = Bindings::new();
        bindings.bind("T", dog());
        assert!(param.is_satisfied(&bindings));

        let mut bindings = Bindings::new();
        bindings.bind("T", TypeKey::nominal("Rock"));
        assert!(!param.is_satisfied(&bindings));
        assert!(!param.is_satisfied(&Bindings::new()));
    }

    #[test]
    fn test_rust_type_keys_are_cached() {
        struct Local;
        assert_eq!(TypeKey::of::<Local>(), TypeKey::of::<Local>());
        assert_eq!(String::type_key(), TypeKey::of::<String>());
    }
}
