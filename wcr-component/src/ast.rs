//! Input tree for the component builder.
//!
//! A component binary or text parser produces this tree; the builder
//! translates it, declaration by declaration, into sort-indexed definitions.
//! Indices follow the component binary format: every reference is an index
//! into the referent sort's index space at the point of the declaration.

use crate::definitions::Sort;
use crate::prelude::*;

/// A parsed component: an ordered list of declarations
#[derive(Debug, Clone, Default)]
pub struct ComponentAst {
    /// Optional component name, used in diagnostics
    pub name: Option<String>,
    /// Declarations in source order
    pub decls: Vec<Decl>,
}

/// One component-level declaration
#[derive(Debug, Clone)]
pub enum Decl {
    /// A core module with its binary encoding
    CoreModule(CoreModuleDecl),
    /// A core instance
    CoreInstance(CoreInstanceDecl),
    /// A core type declaration
    CoreType(CoreTypeExpr),
    /// A nested component
    Component(Box<ComponentAst>),
    /// A component-level instance
    Instance(InstanceDecl),
    /// An alias
    Alias(AliasDecl),
    /// A component-level type declaration
    Type(TypeExpr),
    /// A canonical adapter
    Canon(CanonDecl),
    /// An import
    Import(ImportDecl),
    /// An export
    Export(ExportDecl),
}

/// A core module declaration carrying the module's binary encoding
#[derive(Debug, Clone)]
pub struct CoreModuleDecl {
    /// The core wasm binary, compiled through the engine at build time
    pub bytes: Vec<u8>,
}

/// A core instance declaration
#[derive(Debug, Clone)]
pub enum CoreInstanceDecl {
    /// Instantiate a core module with named instance arguments
    Instantiate {
        /// Core module index
        module_idx: u32,
        /// Instantiation arguments, each naming a core instance
        args: Vec<CoreInstantiateArg>,
    },
    /// Synthesise an instance exporting existing core items under new names
    InlineExports(Vec<CoreInlineExport>),
}

/// One named argument of a core instantiation
#[derive(Debug, Clone)]
pub struct CoreInstantiateArg {
    /// Import module name satisfied by this argument
    pub name: String,
    /// Core instance index supplying the exports
    pub instance_idx: u32,
}

/// One export of a core inline-exports instance
#[derive(Debug, Clone)]
pub struct CoreInlineExport {
    /// Export name
    pub name: String,
    /// Core sort of the exported item
    pub sort: Sort,
    /// Index within that sort
    pub idx: u32,
}

/// A core type declaration
#[derive(Debug, Clone)]
pub enum CoreTypeExpr {
    /// A core function signature
    Func(CoreFuncType),
    /// A core module type (imports and exports)
    Module(ModuleTypeExpr),
}

/// A core module type expression
#[derive(Debug, Clone, Default)]
pub struct ModuleTypeExpr {
    /// Two-level named imports
    pub imports: Vec<((String, String), CoreExternType)>,
    /// Named exports
    pub exports: Vec<(String, CoreExternType)>,
}

/// A component-level instance declaration
#[derive(Debug, Clone)]
pub enum InstanceDecl {
    /// Instantiate a component with named arguments
    Instantiate {
        /// Component index
        component_idx: u32,
        /// Named arguments drawn from the enclosing scope
        args: Vec<InstantiateArg>,
    },
    /// Synthesise an instance exporting existing definitions under new names
    InlineExports(Vec<InlineExport>),
}

/// One named argument of a component instantiation
#[derive(Debug, Clone)]
pub struct InstantiateArg {
    /// Import name satisfied by this argument
    pub name: String,
    /// Sort of the supplied definition
    pub sort: Sort,
    /// Index within that sort
    pub idx: u32,
}

/// One export of an inline-exports instance
#[derive(Debug, Clone)]
pub struct InlineExport {
    /// Export name
    pub name: String,
    /// Sort of the exported definition
    pub sort: Sort,
    /// Index within that sort
    pub idx: u32,
}

/// An alias declaration
#[derive(Debug, Clone)]
pub struct AliasDecl {
    /// Sort of the aliased item
    pub sort: Sort,
    /// What the alias points at
    pub target: AliasTarget,
}

/// The target of an alias
#[derive(Debug, Clone)]
pub enum AliasTarget {
    /// A named export of a component-level instance
    InstanceExport {
        /// Instance index
        instance_idx: u32,
        /// Export name
        name: String,
    },
    /// A named export of a core instance
    CoreInstanceExport {
        /// Core instance index
        instance_idx: u32,
        /// Export name
        name: String,
    },
    /// A definition in an enclosing scope
    Outer {
        /// How many parent scopes to walk; 0 is the current scope
        count: u32,
        /// Index within the target scope
        idx: u32,
    },
}

/// Reference to a value type: inline primitive or type index
#[derive(Debug, Clone, Copy)]
pub enum ValTypeRef {
    /// An inline primitive type
    Prim(PrimValType),
    /// An index into the type index space
    Idx(u32),
}

/// Primitive value types expressible inline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimValType {
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
}

/// A component-level type declaration
#[derive(Debug, Clone)]
pub enum TypeExpr {
    /// A defined value type
    Defined(DefValTypeExpr),
    /// A component function type
    Func(FuncTypeExpr),
    /// A component type (imports and exports)
    Component(Vec<ComponentTypeDecl>),
    /// An instance type (exports)
    Instance(Vec<InstanceTypeDecl>),
    /// A resource type with a 32-bit representation
    Resource {
        /// Optional destructor: a core function index
        dtor: Option<u32>,
    },
}

/// A defined value type expression
#[derive(Debug, Clone)]
pub enum DefValTypeExpr {
    /// A primitive
    Prim(PrimValType),
    /// A record with named fields
    Record(Vec<(String, ValTypeRef)>),
    /// A variant with named, optionally-payloaded cases
    Variant(Vec<(String, Option<ValTypeRef>)>),
    /// A list
    List(ValTypeRef),
    /// A tuple
    Tuple(Vec<ValTypeRef>),
    /// Flags; at most 32 labels
    Flags(Vec<String>),
    /// An enum (payloadless variant)
    Enum(Vec<String>),
    /// An option
    Option(ValTypeRef),
    /// A result
    Result {
        /// Payload of the ok case
        ok: Option<ValTypeRef>,
        /// Payload of the error case
        err: Option<ValTypeRef>,
    },
    /// An owned resource handle; the index names a resource type
    Own(u32),
    /// A borrowed resource handle; the index names a resource type
    Borrow(u32),
}

/// A component function type expression
#[derive(Debug, Clone, Default)]
pub struct FuncTypeExpr {
    /// Named parameters
    pub params: Vec<(String, ValTypeRef)>,
    /// Results
    pub results: Vec<ValTypeRef>,
}

/// One declaration inside a component type expression
#[derive(Debug, Clone)]
pub enum ComponentTypeDecl {
    /// A local type declaration
    Type(TypeExpr),
    /// An alias (outer type aliases only inside type contexts)
    Alias(AliasDecl),
    /// A declared import
    Import {
        /// Import name
        name: String,
        /// Shape of the imported item
        desc: ExternDesc,
    },
    /// A declared export
    Export {
        /// Export name
        name: String,
        /// Shape of the exported item
        desc: ExternDesc,
    },
}

/// One declaration inside an instance type expression
#[derive(Debug, Clone)]
pub enum InstanceTypeDecl {
    /// A local type declaration
    Type(TypeExpr),
    /// An alias (outer type aliases only inside type contexts)
    Alias(AliasDecl),
    /// A declared export
    Export {
        /// Export name
        name: String,
        /// Shape of the exported item
        desc: ExternDesc,
    },
}

/// The declared shape of an import or export
#[derive(Debug, Clone)]
pub enum ExternDesc {
    /// A core module of the given core type index
    CoreModule(u32),
    /// A function of the given type index
    Func(u32),
    /// A type with a bound
    Type(TypeBound),
    /// An instance of the given type index
    Instance(u32),
    /// A component of the given type index
    Component(u32),
}

/// Bound of an imported or exported type
#[derive(Debug, Clone)]
pub enum TypeBound {
    /// Equal to the type at the given index
    Eq(u32),
    /// Any resource type
    SubResource,
}

/// A canonical adapter declaration
#[derive(Debug, Clone)]
pub enum CanonDecl {
    /// Lift a core function to a component function
    Lift {
        /// Core function index
        core_func_idx: u32,
        /// Component function type index
        type_idx: u32,
        /// Canonical ABI options
        opts: Vec<CanonOpt>,
    },
    /// Lower a component function to a core function
    Lower {
        /// Component function index
        func_idx: u32,
        /// Canonical ABI options
        opts: Vec<CanonOpt>,
    },
    /// Create an own handle from a representation
    ResourceNew {
        /// Resource type index
        type_idx: u32,
    },
    /// Drop a handle
    ResourceDrop {
        /// Resource type index
        type_idx: u32,
    },
    /// Read the representation of an own handle
    ResourceRep {
        /// Resource type index
        type_idx: u32,
    },
}

/// A canonical ABI option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonOpt {
    /// Strings are UTF-8
    StringUtf8,
    /// Strings are UTF-16 little-endian
    StringUtf16,
    /// Strings are Latin-1 or UTF-16, discriminated per string
    StringLatin1Utf16,
    /// The linear memory used by the adapter: a core memory index
    Memory(u32),
    /// The allocation function: a core function index
    Realloc(u32),
    /// The post-return cleanup function: a core function index
    PostReturn(u32),
}

/// An import declaration
#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// Import name, possibly version-qualified (`iface@1.2.3`)
    pub name: String,
    /// Shape of the imported item
    pub desc: ExternDesc,
}

/// An export declaration
#[derive(Debug, Clone)]
pub struct ExportDecl {
    /// Export name
    pub name: String,
    /// Sort of the exported definition
    pub sort: Sort,
    /// Index within that sort
    pub idx: u32,
    /// Optional ascribed type
    pub desc: Option<ExternDesc>,
}
