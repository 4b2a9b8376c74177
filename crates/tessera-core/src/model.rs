//! Core data structures for the semantic graph

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Unique, stable identifier for a node.
///
/// Derived from the node kind and a qualified key, so re-extracting the same
/// source reproduces the same ids on any machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn new(kind: NodeKind, key: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"\x00");
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        NodeId(u64::from_le_bytes(bytes))
    }

    /// Id of the module (real or placeholder) with this dotted path.
    pub fn module(dotted_path: &str) -> Self {
        Self::new(NodeKind::Module, dotted_path)
    }

    /// Id of the type node with this canonical name.
    pub fn type_named(canonical: &str) -> Self {
        Self::new(NodeKind::Type, canonical)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{:016x}", self.0)
    }
}

/// Discriminates what kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Class,
    Function,
    Parameter,
    Variable,
    CallSite,
    Type,
    Decorator,
}

impl NodeKind {
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Module,
        NodeKind::Class,
        NodeKind::Function,
        NodeKind::Parameter,
        NodeKind::Variable,
        NodeKind::CallSite,
        NodeKind::Type,
        NodeKind::Decorator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Function => "function",
            NodeKind::Parameter => "parameter",
            NodeKind::Variable => "variable",
            NodeKind::CallSite => "call_site",
            NodeKind::Type => "type",
            NodeKind::Decorator => "decorator",
        }
    }

    /// Kinds addressable by qualified name during resolution.
    pub fn is_symbol(&self) -> bool {
        matches!(
            self,
            NodeKind::Module | NodeKind::Class | NodeKind::Function | NodeKind::Variable
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source position of an entity. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
}

impl Location {
    pub fn new(line: u32, column: u32, end_line: u32) -> Self {
        Location {
            line,
            column,
            end_line,
        }
    }
}

/// A single node in the semantic graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub name: String,
    pub qualified_name: String,
    /// Owning source file. `None` for shared nodes (types, import placeholders).
    pub file_path: Option<PathBuf>,
    pub location: Location,
    /// Set while the node belongs to the changed-set of a validation cycle.
    pub changed: bool,
    pub data: NodeData,
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    pub fn is_in_file(&self, file: &Path) -> bool {
        self.file_path.as_deref() == Some(file)
    }

    /// Placeholder module standing in for an import target that was never indexed.
    pub fn placeholder_module(dotted_path: &str) -> Self {
        let name = dotted_path
            .rsplit('.')
            .next()
            .unwrap_or(dotted_path)
            .to_string();
        GraphNode {
            id: NodeId::module(dotted_path),
            name,
            qualified_name: dotted_path.to_string(),
            file_path: None,
            location: Location::default(),
            changed: false,
            data: NodeData::Module(ModuleData {
                dotted_path: dotted_path.to_string(),
                is_package: false,
                is_external: true,
                imports: Vec::new(),
            }),
        }
    }

    pub fn as_module(&self) -> Option<&ModuleData> {
        match &self.data {
            NodeData::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassData> {
        match &self.data {
            NodeData::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.data {
            NodeData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterData> {
        match &self.data {
            NodeData::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&VariableData> {
        match &self.data {
            NodeData::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_call_site(&self) -> Option<&CallSiteData> {
        match &self.data {
            NodeData::CallSite(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_call_site_mut(&mut self) -> Option<&mut CallSiteData> {
        match &mut self.data {
            NodeData::CallSite(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&TypeData> {
        match &self.data {
            NodeData::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_decorator(&self) -> Option<&DecoratorData> {
        match &self.data {
            NodeData::Decorator(d) => Some(d),
            _ => None,
        }
    }
}

/// Kind-specific payload of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum NodeData {
    Module(ModuleData),
    Class(ClassData),
    Function(FunctionData),
    Parameter(ParameterData),
    Variable(VariableData),
    CallSite(CallSiteData),
    Type(TypeData),
    Decorator(DecoratorData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Module(_) => NodeKind::Module,
            NodeData::Class(_) => NodeKind::Class,
            NodeData::Function(_) => NodeKind::Function,
            NodeData::Parameter(_) => NodeKind::Parameter,
            NodeData::Variable(_) => NodeKind::Variable,
            NodeData::CallSite(_) => NodeKind::CallSite,
            NodeData::Type(_) => NodeKind::Type,
            NodeData::Decorator(_) => NodeKind::Decorator,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleData {
    pub dotted_path: String,
    pub is_package: bool,
    /// Placeholder for an import target that is not an indexed file.
    pub is_external: bool,
    /// Names bound by import statements, kept for later re-resolution.
    pub imports: Vec<ImportBinding>,
}

/// `alias` is the local name; `target` the dotted name it refers to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportBinding {
    pub alias: String,
    pub target: String,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClassData {
    pub bases: Vec<BaseRef>,
    pub decorators: Vec<String>,
}

/// A base class as written, plus the qualified names it may refer to, in
/// lookup order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaseRef {
    pub text: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FunctionData {
    pub signature: String,
    pub return_type: Option<String>,
    pub flags: FunctionFlags,
    pub visibility: Visibility,
    pub returns: Vec<ReturnSite>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FunctionFlags {
    pub is_async: bool,
    pub is_generator: bool,
    /// Declared directly in a class body.
    pub is_method: bool,
    pub is_staticmethod: bool,
    pub is_classmethod: bool,
    pub is_property: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

impl Visibility {
    /// Python naming convention: `_x` is protected, `__x` private, dunders public.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("__") && !name.ends_with("__") {
            Visibility::Private
        } else if name.starts_with('_') && !name.starts_with("__") {
            Visibility::Protected
        } else {
            Visibility::Public
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturnSite {
    pub line: u32,
    pub column: u32,
    pub inferred_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterData {
    pub function: NodeId,
    pub position: u32,
    pub kind: ParameterKind,
    pub declared_type: Option<String>,
    pub has_default: bool,
}

impl ParameterData {
    pub fn is_variadic(&self) -> bool {
        matches!(
            self.kind,
            ParameterKind::VariadicPositional | ParameterKind::VariadicKeyword
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Positional,
    KeywordOnly,
    VariadicPositional,
    VariadicKeyword,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableData {
    pub scope: VariableScope,
    pub declared_type: Option<String>,
    pub assignments: Vec<AssignmentSite>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Module,
    Class,
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentSite {
    pub line: u32,
    pub column: u32,
    pub inferred_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallSiteData {
    pub caller: NodeId,
    pub callee: String,
    pub resolution_status: ResolutionStatus,
    /// Number of positional arguments.
    pub arg_count: u32,
    pub arguments: Vec<Argument>,
    pub has_star_args: bool,
    pub has_star_kwargs: bool,
    /// The target binds `self`/`cls` implicitly (method call or constructor).
    pub implicit_receiver: bool,
    pub candidates: Vec<Candidate>,
}

impl CallSiteData {
    pub fn is_resolved(&self) -> bool {
        self.resolution_status == ResolutionStatus::Resolved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Argument {
    pub keyword: Option<String>,
    pub inferred_type: Option<String>,
}

/// One way a callee name may resolve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Candidate {
    /// A fully qualified function or class (a class resolves to its `__init__`).
    Qualified(String),
    /// `member` looked up on `class` and then along its bases. `bound` when
    /// the receiver is an instance (or `cls`), so the target's first
    /// parameter is supplied implicitly.
    Member {
        class: String,
        member: String,
        bound: bool,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Resolved,
    Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeData {
    pub canonical: String,
    /// `builtins`, `typing`, a module dotted path, or `unknown`.
    pub namespace: String,
    pub kind: TypeKind,
    /// Direct supertypes, for builtins and classes.
    pub bases: Vec<String>,
    /// Generic arguments, or union members.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Nominal,
    Generic,
    Union,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecoratorData {
    /// Expression text without the leading `@`.
    pub expression: String,
    /// Callable part of the expression: `app.route` for `app.route("/")`.
    pub name: String,
    pub target: NodeId,
    pub target_kind: NodeKind,
    pub candidates: Vec<String>,
}

/// What kind of relationship this edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Declares,
    HasParameter,
    HasCallsite,
    ResolvesTo,
    Inherits,
    Imports,
    ReturnsType,
    HasType,
    IsSubtypeOf,
    AssignsTo,
    ReadsFrom,
    References,
    HasDecorator,
    Decorates,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 14] = [
        EdgeKind::Declares,
        EdgeKind::HasParameter,
        EdgeKind::HasCallsite,
        EdgeKind::ResolvesTo,
        EdgeKind::Inherits,
        EdgeKind::Imports,
        EdgeKind::ReturnsType,
        EdgeKind::HasType,
        EdgeKind::IsSubtypeOf,
        EdgeKind::AssignsTo,
        EdgeKind::ReadsFrom,
        EdgeKind::References,
        EdgeKind::HasDecorator,
        EdgeKind::Decorates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Declares => "DECLARES",
            EdgeKind::HasParameter => "HAS_PARAMETER",
            EdgeKind::HasCallsite => "HAS_CALLSITE",
            EdgeKind::ResolvesTo => "RESOLVES_TO",
            EdgeKind::Inherits => "INHERITS",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::ReturnsType => "RETURNS_TYPE",
            EdgeKind::HasType => "HAS_TYPE",
            EdgeKind::IsSubtypeOf => "IS_SUBTYPE_OF",
            EdgeKind::AssignsTo => "ASSIGNS_TO",
            EdgeKind::ReadsFrom => "READS_FROM",
            EdgeKind::References => "REFERENCES",
            EdgeKind::HasDecorator => "HAS_DECORATOR",
            EdgeKind::Decorates => "DECORATES",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a `REFERENCES` edge uses its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Call,
    Decorate,
    Read,
    Write,
    Import,
    Annotation,
}

/// Edge identity: at most one edge per `(source, target, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.kind, self.target)
    }
}

/// A directed edge in the semantic graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    /// File whose extraction produced this edge; `None` for seeded edges.
    pub file_path: Option<PathBuf>,
    /// Where in source this relationship is expressed.
    pub line: Option<u32>,
    /// Only set on `RESOLVES_TO`.
    pub resolution: Option<ResolutionStatus>,
    /// Only set on `REFERENCES`.
    pub access: Option<AccessType>,
}

impl GraphEdge {
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind) -> Self {
        GraphEdge {
            source,
            target,
            kind,
            file_path: None,
            line: None,
            resolution: None,
            access: None,
        }
    }

    pub fn in_file(mut self, file: &Path) -> Self {
        self.file_path = Some(file.to_path_buf());
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn resolved(mut self) -> Self {
        self.resolution = Some(ResolutionStatus::Resolved);
        self
    }

    pub fn with_access(mut self, access: AccessType) -> Self {
        self.access = Some(access);
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source,
            target: self.target,
            kind: self.kind,
        }
    }
}
