//! Component-model type system.
//!
//! A closed set of type kinds with finite size/depth budgets enforced at
//! construction. Composite types cache their computed weight and depth so
//! budget checks stay cheap. Resource types are nominal: identity is the
//! `Rc` allocation itself, compared with `Rc::ptr_eq`.

use crate::engine::CoreFunc;
use crate::instance::Instance;
use crate::prelude::*;
use crate::resources::HandleRep;

/// Maximum accumulated type weight
pub const MAX_TYPE_SIZE: u32 = 1_000_000;
/// Maximum type nesting depth
pub const MAX_TYPE_DEPTH: u32 = 100;
/// Maximum number of flags labels
pub const MAX_FLAGS: usize = 32;

/// A component-model value type
#[derive(Clone, Debug)]
pub enum ValType {
    /// Boolean
    Bool,
    /// Signed 8-bit integer
    S8,
    /// Unsigned 8-bit integer
    U8,
    /// Signed 16-bit integer
    S16,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 32-bit integer
    S32,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 64-bit integer
    S64,
    /// Unsigned 64-bit integer
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Unicode scalar value
    Char,
    /// String
    String,
    /// `list<u8>` kept as a dedicated kind for efficient I/O
    ByteArray,
    /// Homogeneous list
    List(Rc<ValType>),
    /// Record with named fields
    Record(Rc<RecordType>),
    /// Tuple: a record with positional labels
    Tuple(Rc<TupleType>),
    /// Variant with named cases
    Variant(Rc<VariantType>),
    /// Enum: a variant with no payloads
    Enum(Rc<EnumType>),
    /// Optional value
    Option(Rc<ValType>),
    /// Result with optional payloads
    Result(Rc<ResultType>),
    /// Flags bitset, at most 32 labels
    Flags(Rc<FlagsType>),
    /// Owned resource handle
    Own(Rc<ResourceType>),
    /// Borrowed resource handle
    Borrow(Rc<ResourceType>),
}

/// A record type with named fields
#[derive(Debug)]
pub struct RecordType {
    /// Fields in declaration order
    pub fields: Vec<(String, ValType)>,
    size: u32,
    depth: u32,
}

/// A tuple type
#[derive(Debug)]
pub struct TupleType {
    /// Element types in order
    pub types: Vec<ValType>,
    size: u32,
    depth: u32,
}

/// A variant type with named cases
#[derive(Debug)]
pub struct VariantType {
    /// Cases in declaration order
    pub cases: Vec<(String, Option<ValType>)>,
    size: u32,
    depth: u32,
}

/// An enum type: case names only
#[derive(Debug)]
pub struct EnumType {
    /// Case names in declaration order
    pub cases: Vec<String>,
}

/// A result type
#[derive(Debug)]
pub struct ResultType {
    /// Payload of the ok case
    pub ok: Option<ValType>,
    /// Payload of the error case
    pub err: Option<ValType>,
}

/// A flags type
#[derive(Debug)]
pub struct FlagsType {
    /// Flag labels in declaration order
    pub labels: Vec<String>,
}

/// Representation kind of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepKind {
    /// Guest resources: a 32-bit integer representation
    U32,
    /// Host resources: an opaque host value
    Host,
}

/// Destructor of a resource type
#[derive(Clone)]
pub enum ResourceDtor {
    /// A core function taking the i32 representation
    Core(CoreFunc),
    /// A host callback taking the representation value
    Host(Rc<dyn Fn(&HandleRep) -> Result<()>>),
}

impl Debug for ResourceDtor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceDtor::Core(func) => write!(f, "ResourceDtor::Core({func:?})"),
            ResourceDtor::Host(_) => f.write_str("ResourceDtor::Host"),
        }
    }
}

/// A nominal resource type.
///
/// Identity is the allocation itself: two resource types are the same type
/// exactly when their `Rc`s point at the same `ResourceType`. Types created
/// during pure (static) type construction are *bound markers*: stand-ins
/// that a [`crate::type_check::TypeChecker`] binds to the first concrete
/// identity encountered during a check.
#[derive(Debug)]
pub struct ResourceType {
    rep: RepKind,
    bound: bool,
    dtor: RefCell<Option<ResourceDtor>>,
    owner: RefCell<Weak<Instance>>,
}

impl ResourceType {
    /// Create a fresh concrete resource type
    pub fn fresh(rep: RepKind) -> Rc<Self> {
        Rc::new(Self {
            rep,
            bound: false,
            dtor: RefCell::new(None),
            owner: RefCell::new(Weak::new()),
        })
    }

    /// Create a bound-marker resource type for static type construction
    pub fn bound_marker() -> Rc<Self> {
        Rc::new(Self {
            rep: RepKind::U32,
            bound: true,
            dtor: RefCell::new(None),
            owner: RefCell::new(Weak::new()),
        })
    }

    /// Representation kind
    pub fn rep(&self) -> RepKind {
        self.rep
    }

    /// Whether this is a bound marker rather than a concrete identity
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Attach the destructor
    pub fn set_dtor(&self, dtor: ResourceDtor) {
        *self.dtor.borrow_mut() = Some(dtor);
    }

    /// The destructor, if any
    pub fn dtor(&self) -> Option<ResourceDtor> {
        self.dtor.borrow().clone()
    }

    /// Attach the owning component instance
    pub fn set_owner(&self, instance: &Rc<Instance>) {
        *self.owner.borrow_mut() = Rc::downgrade(instance);
    }

    /// The owning component instance, if still alive
    pub fn owner(&self) -> Option<Rc<Instance>> {
        self.owner.borrow().upgrade()
    }

    /// Nominal identity comparison
    pub fn same_identity(a: &Rc<Self>, b: &Rc<Self>) -> bool {
        Rc::ptr_eq(a, b)
    }
}

/// A component function type
#[derive(Debug)]
pub struct FuncType {
    /// Named parameters in order
    pub params: Vec<(String, ValType)>,
    /// Results in order
    pub results: Vec<ValType>,
    /// Host-synthesised functions skip the parameter-name equality check
    pub skip_param_name_check: bool,
    size: u32,
    depth: u32,
}

/// A component type: declared imports and exports
#[derive(Debug)]
pub struct ComponentType {
    /// Imports as `(name, type)` in declaration order
    pub imports: Vec<(String, Type)>,
    /// Exports as `(name, type)` in declaration order
    pub exports: Vec<(String, Type)>,
    size: u32,
    depth: u32,
}

/// An instance type: declared exports
#[derive(Debug)]
pub struct InstanceType {
    /// Exports as `(name, type)` in declaration order
    pub exports: Vec<(String, Type)>,
    size: u32,
    depth: u32,
}

/// Any component-model or core type
#[derive(Clone, Debug)]
pub enum Type {
    /// A value type
    Val(ValType),
    /// A resource type
    Resource(Rc<ResourceType>),
    /// A component function type
    Func(Rc<FuncType>),
    /// A core function type
    CoreFunc(Rc<CoreFuncType>),
    /// A core memory type
    CoreMemory(CoreMemoryType),
    /// A core table type
    CoreTable(CoreTableType),
    /// A core global type
    CoreGlobal(CoreGlobalType),
    /// A core module type
    CoreModule(Rc<ModuleType>),
    /// A core instance type
    CoreInstance(Rc<CoreInstanceType>),
    /// A component type
    Component(Rc<ComponentType>),
    /// An instance type
    Instance(Rc<InstanceType>),
}

fn check_budgets(what: &str, size: u32, depth: u32) -> Result<()> {
    if size > MAX_TYPE_SIZE {
        return Err(Error::type_size_exceeded(format!(
            "{what} weight {size} exceeds the maximum of {MAX_TYPE_SIZE}"
        )));
    }
    if depth > MAX_TYPE_DEPTH {
        return Err(Error::type_depth_exceeded(format!(
            "{what} depth {depth} exceeds the maximum of {MAX_TYPE_DEPTH}"
        )));
    }
    Ok(())
}

/// Validate a value type against the global size/depth budgets.
///
/// Composite constructors check their own budgets; this covers the bare
/// wrapper kinds (`list`, `option`) that are built without a constructor.
pub fn check_valtype_budgets(ty: &ValType) -> Result<()> {
    check_budgets(ty.type_name(), ty.type_size(), ty.type_depth())
}

fn check_unique_names<'a>(
    what: &str,
    names: impl Iterator<Item = &'a String>,
) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if seen.contains(&name.as_str()) {
            return Err(Error::duplicate_name(format!(
                "duplicate {what} name `{name}`"
            )));
        }
        seen.push(name);
    }
    Ok(())
}

impl RecordType {
    /// Construct a record type, validating field names and budgets
    pub fn new(fields: Vec<(String, ValType)>) -> Result<Rc<Self>> {
        check_unique_names("record field", fields.iter().map(|(n, _)| n))?;
        let size = 1 + fields.iter().map(|(_, t)| t.type_size()).sum::<u32>();
        let depth = 1 + fields.iter().map(|(_, t)| t.type_depth()).max().unwrap_or(0);
        check_budgets("record", size, depth)?;
        Ok(Rc::new(Self { fields, size, depth }))
    }
}

impl TupleType {
    /// Construct a tuple type, validating budgets
    pub fn new(types: Vec<ValType>) -> Result<Rc<Self>> {
        let size = 1 + types.iter().map(ValType::type_size).sum::<u32>();
        let depth = 1 + types.iter().map(ValType::type_depth).max().unwrap_or(0);
        check_budgets("tuple", size, depth)?;
        Ok(Rc::new(Self { types, size, depth }))
    }
}

impl VariantType {
    /// Construct a variant type, validating case names and budgets
    pub fn new(cases: Vec<(String, Option<ValType>)>) -> Result<Rc<Self>> {
        if cases.is_empty() {
            return Err(Error::validation_error("variant needs at least one case"));
        }
        check_unique_names("variant case", cases.iter().map(|(n, _)| n))?;
        let size = 1
            + cases
                .iter()
                .map(|(_, t)| t.as_ref().map_or(1, ValType::type_size))
                .sum::<u32>();
        let depth = 1
            + cases
                .iter()
                .filter_map(|(_, t)| t.as_ref().map(ValType::type_depth))
                .max()
                .unwrap_or(0);
        check_budgets("variant", size, depth)?;
        Ok(Rc::new(Self { cases, size, depth }))
    }

    /// Case index by name
    pub fn case_index(&self, name: &str) -> Option<u32> {
        self.cases.iter().position(|(n, _)| n == name).map(|i| i as u32)
    }
}

impl EnumType {
    /// Construct an enum type, validating case names
    pub fn new(cases: Vec<String>) -> Result<Rc<Self>> {
        if cases.is_empty() {
            return Err(Error::validation_error("enum needs at least one case"));
        }
        check_unique_names("enum case", cases.iter())?;
        Ok(Rc::new(Self { cases }))
    }
}

impl ResultType {
    /// Construct a result type, validating budgets
    pub fn new(ok: Option<ValType>, err: Option<ValType>) -> Result<Rc<Self>> {
        let size = 1
            + ok.as_ref().map_or(0, ValType::type_size)
            + err.as_ref().map_or(0, ValType::type_size);
        let depth = 1
            + ok.as_ref()
                .map(ValType::type_depth)
                .max(err.as_ref().map(ValType::type_depth))
                .unwrap_or(0);
        check_budgets("result", size, depth)?;
        Ok(Rc::new(Self { ok, err }))
    }
}

impl FlagsType {
    /// Construct a flags type; at most [`MAX_FLAGS`] labels
    pub fn new(labels: Vec<String>) -> Result<Rc<Self>> {
        if labels.is_empty() {
            return Err(Error::validation_error("flags needs at least one label"));
        }
        if labels.len() > MAX_FLAGS {
            return Err(Error::validation_error(format!(
                "flags supports at most {MAX_FLAGS} labels, got {}",
                labels.len()
            )));
        }
        check_unique_names("flag", labels.iter())?;
        Ok(Rc::new(Self { labels }))
    }
}

impl FuncType {
    /// Construct a function type, validating parameter names and budgets
    pub fn new(params: Vec<(String, ValType)>, results: Vec<ValType>) -> Result<Rc<Self>> {
        Self::build(params, results, false)
    }

    /// Construct a host function type that skips parameter-name checks
    pub fn new_host(params: Vec<(String, ValType)>, results: Vec<ValType>) -> Result<Rc<Self>> {
        Self::build(params, results, true)
    }

    fn build(
        params: Vec<(String, ValType)>,
        results: Vec<ValType>,
        skip_param_name_check: bool,
    ) -> Result<Rc<Self>> {
        check_strongly_unique("parameter", params.iter().map(|(n, _)| n.as_str()))?;
        let size = 1
            + params.iter().map(|(_, t)| t.type_size()).sum::<u32>()
            + results.iter().map(ValType::type_size).sum::<u32>();
        let depth = 1
            + params
                .iter()
                .map(|(_, t)| t.type_depth())
                .chain(results.iter().map(ValType::type_depth))
                .max()
                .unwrap_or(0);
        check_budgets("function", size, depth)?;
        Ok(Rc::new(Self { params, results, skip_param_name_check, size, depth }))
    }
}

impl ComponentType {
    /// Construct a component type, validating names and budgets
    pub fn new(imports: Vec<(String, Type)>, exports: Vec<(String, Type)>) -> Result<Rc<Self>> {
        check_strongly_unique("import", imports.iter().map(|(n, _)| n.as_str()))?;
        check_strongly_unique("export", exports.iter().map(|(n, _)| n.as_str()))?;
        let size = 1
            + imports.iter().map(|(_, t)| t.type_size()).sum::<u32>()
            + exports.iter().map(|(_, t)| t.type_size()).sum::<u32>();
        let depth = 1
            + imports
                .iter()
                .chain(exports.iter())
                .map(|(_, t)| t.type_depth())
                .max()
                .unwrap_or(0);
        check_budgets("component", size, depth)?;
        Ok(Rc::new(Self { imports, exports, size, depth }))
    }

    /// Import type by name
    pub fn import(&self, name: &str) -> Option<&Type> {
        self.imports.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Export type by name
    pub fn export(&self, name: &str) -> Option<&Type> {
        self.exports.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

impl InstanceType {
    /// Construct an instance type, validating names and budgets
    pub fn new(exports: Vec<(String, Type)>) -> Result<Rc<Self>> {
        check_strongly_unique("export", exports.iter().map(|(n, _)| n.as_str()))?;
        let size = 1 + exports.iter().map(|(_, t)| t.type_size()).sum::<u32>();
        let depth = 1 + exports.iter().map(|(_, t)| t.type_depth()).max().unwrap_or(0);
        check_budgets("instance", size, depth)?;
        Ok(Rc::new(Self { exports, size, depth }))
    }

    /// Export type by name
    pub fn export(&self, name: &str) -> Option<&Type> {
        self.exports.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

impl ValType {
    /// Accumulated type weight
    pub fn type_size(&self) -> u32 {
        match self {
            ValType::List(inner) | ValType::Option(inner) => 1 + inner.type_size(),
            ValType::Record(r) => r.size,
            ValType::Tuple(t) => t.size,
            ValType::Variant(v) => v.size,
            ValType::Enum(e) => 1 + e.cases.len() as u32,
            ValType::Result(r) => {
                1 + r.ok.as_ref().map_or(0, ValType::type_size)
                    + r.err.as_ref().map_or(0, ValType::type_size)
            }
            ValType::Flags(f) => 1 + f.labels.len() as u32,
            _ => 1,
        }
    }

    /// Nesting depth
    pub fn type_depth(&self) -> u32 {
        match self {
            ValType::List(inner) | ValType::Option(inner) => 1 + inner.type_depth(),
            ValType::Record(r) => r.depth,
            ValType::Tuple(t) => t.depth,
            ValType::Variant(v) => v.depth,
            ValType::Result(r) => {
                1 + r
                    .ok
                    .as_ref()
                    .map(ValType::type_depth)
                    .max(r.err.as_ref().map(ValType::type_depth))
                    .unwrap_or(0)
            }
            _ => 1,
        }
    }

    /// Short name of the type kind
    pub fn type_name(&self) -> &'static str {
        match self {
            ValType::Bool => "bool",
            ValType::S8 => "s8",
            ValType::U8 => "u8",
            ValType::S16 => "s16",
            ValType::U16 => "u16",
            ValType::S32 => "s32",
            ValType::U32 => "u32",
            ValType::S64 => "s64",
            ValType::U64 => "u64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::Char => "char",
            ValType::String => "string",
            ValType::ByteArray => "byte-array",
            ValType::List(_) => "list",
            ValType::Record(_) => "record",
            ValType::Tuple(_) => "tuple",
            ValType::Variant(_) => "variant",
            ValType::Enum(_) => "enum",
            ValType::Option(_) => "option",
            ValType::Result(_) => "result",
            ValType::Flags(_) => "flags",
            ValType::Own(_) => "own",
            ValType::Borrow(_) => "borrow",
        }
    }

    /// Whether the type transitively mentions a resource type
    pub fn contains_resource(&self) -> bool {
        match self {
            ValType::Own(_) | ValType::Borrow(_) => true,
            ValType::List(inner) | ValType::Option(inner) => inner.contains_resource(),
            ValType::Record(r) => r.fields.iter().any(|(_, t)| t.contains_resource()),
            ValType::Tuple(t) => t.types.iter().any(ValType::contains_resource),
            ValType::Variant(v) => v
                .cases
                .iter()
                .any(|(_, t)| t.as_ref().is_some_and(ValType::contains_resource)),
            ValType::Result(r) => {
                r.ok.as_ref().is_some_and(ValType::contains_resource)
                    || r.err.as_ref().is_some_and(ValType::contains_resource)
            }
            _ => false,
        }
    }
}

impl Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Type {
    /// Accumulated type weight
    pub fn type_size(&self) -> u32 {
        match self {
            Type::Val(v) => v.type_size(),
            Type::Func(ft) => ft.size,
            Type::Component(c) => c.size,
            Type::Instance(i) => i.size,
            Type::CoreModule(m) => 1 + (m.imports.len() + m.exports.len()) as u32,
            Type::CoreInstance(i) => 1 + i.exports.len() as u32,
            _ => 1,
        }
    }

    /// Nesting depth
    pub fn type_depth(&self) -> u32 {
        match self {
            Type::Val(v) => v.type_depth(),
            Type::Func(ft) => ft.depth,
            Type::Component(c) => c.depth,
            Type::Instance(i) => i.depth,
            _ => 1,
        }
    }

    /// Short name of the type kind
    pub fn type_name(&self) -> &'static str {
        match self {
            Type::Val(v) => v.type_name(),
            Type::Resource(_) => "resource",
            Type::Func(_) => "func",
            Type::CoreFunc(_) => "core func",
            Type::CoreMemory(_) => "core memory",
            Type::CoreTable(_) => "core table",
            Type::CoreGlobal(_) => "core global",
            Type::CoreModule(_) => "core module",
            Type::CoreInstance(_) => "core instance",
            Type::Component(_) => "component",
            Type::Instance(_) => "instance",
        }
    }

    /// Whether this is a statically-known type export: a plain type (not a
    /// function, instance, component or core item) whose resolution provably
    /// depends on no resource. Such exports may be synthesised verbatim when
    /// an instance argument lacks them.
    pub fn statically_known(&self) -> bool {
        matches!(self, Type::Val(_)) && !self.contains_resource()
    }

    /// Whether the type transitively mentions a resource type
    pub fn contains_resource(&self) -> bool {
        match self {
            Type::Val(v) => v.contains_resource(),
            Type::Resource(_) => true,
            Type::Func(ft) => {
                ft.params.iter().any(|(_, t)| t.contains_resource())
                    || ft.results.iter().any(ValType::contains_resource)
            }
            Type::Component(c) => c
                .imports
                .iter()
                .chain(c.exports.iter())
                .any(|(_, t)| t.contains_resource()),
            Type::Instance(i) => i.exports.iter().any(|(_, t)| t.contains_resource()),
            _ => false,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// The strongly-unique name rule.
///
/// Ordered: identical names collide; `[constructor]l` never collides with
/// `l`; a method-style `[...]l.l'` collides with plain `l'`; otherwise
/// bracket prefixes are stripped, contiguous uppercase runs lowercased, and
/// the foldings compared for inequality.
pub fn strongly_unique(a: &str, b: &str) -> bool {
    if a == b {
        return false;
    }
    let (prefix_a, base_a) = split_bracket_prefix(a);
    let (prefix_b, base_b) = split_bracket_prefix(b);
    if (prefix_a == Some("constructor") && base_a == b)
        || (prefix_b == Some("constructor") && base_b == a)
    {
        return true;
    }
    if prefix_a.is_some() && base_a.rsplit('.').next() == Some(b) {
        return false;
    }
    if prefix_b.is_some() && base_b.rsplit('.').next() == Some(a) {
        return false;
    }
    fold_name(base_a) != fold_name(base_b)
}

fn split_bracket_prefix(name: &str) -> (Option<&str>, &str) {
    if let Some(rest) = name.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return (Some(&rest[..end]), &rest[end + 1..]);
        }
    }
    (None, name)
}

fn fold_name(name: &str) -> String {
    // Lowercase contiguous runs of uppercase ASCII letters
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Validate one candidate name against one prior name
pub fn check_strongly_unique_pair(what: &str, prior: &str, candidate: &str) -> Result<()> {
    if strongly_unique(prior, candidate) {
        Ok(())
    } else {
        Err(Error::duplicate_name(format!(
            "{what} name `{candidate}` is not strongly unique against `{prior}`"
        )))
    }
}

/// Validate that every name in `names` is strongly unique against the ones
/// before it
pub fn check_strongly_unique<'a>(
    what: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        for prior in &seen {
            if !strongly_unique(prior, name) {
                return Err(Error::duplicate_name(format!(
                    "{what} name `{name}` is not strongly unique against `{prior}`"
                )));
            }
        }
        seen.push(name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_sizes_and_depths() {
        assert_eq!(ValType::U32.type_size(), 1);
        assert_eq!(ValType::U32.type_depth(), 1);
        let list = ValType::List(Rc::new(ValType::String));
        assert_eq!(list.type_size(), 2);
        assert_eq!(list.type_depth(), 2);
    }

    #[test]
    fn record_budgets_accumulate() {
        let record = RecordType::new(vec![
            ("a".to_string(), ValType::U8),
            ("b".to_string(), ValType::List(Rc::new(ValType::U32))),
        ])
        .unwrap();
        let ty = ValType::Record(record);
        assert_eq!(ty.type_size(), 1 + 1 + 2);
        assert_eq!(ty.type_depth(), 3);
    }

    #[test]
    fn duplicate_field_names_rejected() {
        let err = RecordType::new(vec![
            ("x".to_string(), ValType::U8),
            ("x".to_string(), ValType::U8),
        ])
        .unwrap_err();
        assert_eq!(err.code, codes::DUPLICATE_NAME);
    }

    #[test]
    fn depth_budget_enforced() {
        let mut ty = ValType::Bool;
        for _ in 0..MAX_TYPE_DEPTH {
            ty = ValType::List(Rc::new(ty));
        }
        // One more wrapper pushes a tuple constructor past the limit
        let err = TupleType::new(vec![ty]).unwrap_err();
        assert_eq!(err.code, codes::TYPE_DEPTH_EXCEEDED);
    }

    #[test]
    fn flags_limited_to_32() {
        let labels: Vec<String> = (0..33).map(|i| format!("f{i}")).collect();
        assert!(FlagsType::new(labels).is_err());
        let labels: Vec<String> = (0..32).map(|i| format!("f{i}")).collect();
        assert!(FlagsType::new(labels).is_ok());
    }

    #[test]
    fn resource_identity_is_nominal() {
        let a = ResourceType::fresh(RepKind::U32);
        let b = ResourceType::fresh(RepKind::U32);
        assert!(ResourceType::same_identity(&a, &a.clone()));
        assert!(!ResourceType::same_identity(&a, &b));
    }

    #[test]
    fn strongly_unique_rules() {
        // (a) identical
        assert!(!strongly_unique("foo", "foo"));
        // (b) constructor versus bare name
        assert!(strongly_unique("[constructor]point", "point"));
        // (c) method versus bare final segment
        assert!(!strongly_unique("[method]point.x", "x"));
        // (d) case folding after stripping prefixes
        assert!(!strongly_unique("[method]Frob", "[static]frob"));
        assert!(strongly_unique("alpha", "beta"));
    }

    #[test]
    fn contains_resource_walks_composites() {
        let res = ResourceType::fresh(RepKind::U32);
        let record = RecordType::new(vec![(
            "h".to_string(),
            ValType::Own(res),
        )])
        .unwrap();
        assert!(ValType::Record(record).contains_resource());
        assert!(!ValType::String.contains_resource());
    }
}
