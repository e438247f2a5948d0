use std::collections::HashSet;

use atlas_core::TagKind;
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser, Tree};

use crate::fallback;
use crate::walker::Language;

/// Upper bound on a single structured parse.
const PARSE_TIMEOUT_MICROS: u64 = 5_000_000;

/// Longest chain of nested name nodes followed when resolving an identifier.
const MAX_NAME_DEPTH: usize = 16;

/// One identifier occurrence in a source file.
///
/// # Examples
///
/// ```
/// use atlas_core::TagKind;
/// use atlas_repomap::parser::Tag;
/// use atlas_repomap::walker::Language;
///
/// let tag = Tag {
///     file: "src/db.py".into(),
///     name: "connect".into(),
///     kind: TagKind::Definition,
///     line: 3,
///     language: Language::Python,
/// };
/// assert!(tag.is_definition());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Path relative to the project root.
    pub file: String,
    /// Identifier text, never empty.
    pub name: String,
    /// Definition or reference.
    pub kind: TagKind,
    /// 1-based line of the identifier.
    pub line: u32,
    /// Language the file was parsed as.
    pub language: Language,
}

impl Tag {
    pub fn is_definition(&self) -> bool {
        self.kind == TagKind::Definition
    }
}

/// Which strategy produced a file's tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Structured,
    Fallback,
    Unsupported,
}

/// Result of extracting tags from one file.
///
/// `error` is set only when no strategy produced any tags and at least one
/// strategy failed outright.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub tags: Vec<Tag>,
    pub method: ExtractionMethod,
    pub error: Option<String>,
}

/// Extract definition and reference tags from a file's content.
///
/// Structured parsing runs first. When the language has no grammar, the
/// parse fails, or it yields no tags at all, the regex fallback for the
/// language family runs instead. This function never panics and never
/// returns an error; failures are carried in [`Extraction::error`].
///
/// # Examples
///
/// ```
/// use atlas_core::TagKind;
/// use atlas_repomap::parser::extract_tags;
///
/// let extraction = extract_tags("app.py", "def hello():\n    greet()\n");
/// let names: Vec<(&str, TagKind)> = extraction
///     .tags
///     .iter()
///     .map(|t| (t.name.as_str(), t.kind))
///     .collect();
/// assert!(names.contains(&("hello", TagKind::Definition)));
/// assert!(names.contains(&("greet", TagKind::Reference)));
/// ```
pub fn extract_tags(file: &str, content: &str) -> Extraction {
    let language = Language::from_path(file);
    if !language.is_supported() {
        return Extraction {
            tags: Vec::new(),
            method: ExtractionMethod::Unsupported,
            error: Some("unsupported file type".into()),
        };
    }

    let failure = match structured_tags(file, content, language) {
        Ok(tags) if !tags.is_empty() => {
            return Extraction {
                tags,
                method: ExtractionMethod::Structured,
                error: None,
            };
        }
        Ok(_) => None,
        Err(reason) => {
            tracing::debug!(file, error = %reason, "structured parse failed, using regex fallback");
            Some(reason)
        }
    };

    let tags = fallback::extract_fallback_tags(file, content, language);
    let error = if tags.is_empty() {
        failure.map(|reason| format!("parse failed and fallback found no tags: {reason}"))
    } else {
        None
    };
    Extraction {
        tags,
        method: ExtractionMethod::Fallback,
        error,
    }
}

fn structured_tags(file: &str, content: &str, language: Language) -> Result<Vec<Tag>, String> {
    let ts_language = language
        .tree_sitter_language()
        .ok_or_else(|| "no grammar available".to_string())?;
    let rules = rules_for(language).ok_or_else(|| "no extraction rules".to_string())?;

    let mut parser = Parser::new();
    parser
        .set_language(&ts_language)
        .map_err(|e| format!("failed to set language: {e}"))?;
    parser.set_timeout_micros(PARSE_TIMEOUT_MICROS);

    let tree = parser
        .parse(content, None)
        .ok_or_else(|| "parser returned no tree".to_string())?;

    Ok(collect_tags(&tree, content.as_bytes(), rules, file, language))
}

/// Where a definition's name lives relative to the definition node.
enum NameSource {
    Field(&'static str),
    Child(&'static str),
    /// Follow C-style `declarator` fields down to the identifier.
    Declarator,
}

struct DefinitionRule {
    kind: &'static str,
    names: &'static [NameSource],
    /// Nested nodes are no longer at module scope.
    opens_scope: bool,
    /// Only fires at module scope (top-level assignments).
    top_level_only: bool,
    /// Only fires when this field is present (e.g. a struct with a body).
    requires_field: Option<&'static str>,
}

enum Target {
    /// The rightmost identifier of a field, or of the first named child.
    Callee(Option<&'static str>),
    /// The node itself is the referenced identifier.
    Itself,
    /// Every identifier beneath the node; the subtree is not visited further.
    Leaves,
    /// Every identifier beneath each child carrying this field name.
    FieldLeaves(&'static str),
}

struct ReferenceRule {
    kind: &'static str,
    target: Target,
}

struct LanguageRules {
    definitions: &'static [DefinitionRule],
    references: &'static [ReferenceRule],
}

impl LanguageRules {
    fn definition(&self, kind: &str) -> Option<&DefinitionRule> {
        self.definitions.iter().find(|r| r.kind == kind)
    }

    fn reference(&self, kind: &str) -> Option<&ReferenceRule> {
        self.references.iter().find(|r| r.kind == kind)
    }
}

const NAME: &[NameSource] = &[NameSource::Field("name")];
const DECLARATOR: &[NameSource] = &[NameSource::Declarator];
const LEFT: &[NameSource] = &[NameSource::Field("left")];
const NO_NAME: &[NameSource] = &[];
const KOTLIN_NAME: &[NameSource] = &[
    NameSource::Field("name"),
    NameSource::Child("simple_identifier"),
    NameSource::Child("identifier"),
    NameSource::Child("type_identifier"),
];
const SWIFT_NAME: &[NameSource] = &[
    NameSource::Field("name"),
    NameSource::Child("simple_identifier"),
    NameSource::Child("type_identifier"),
];

const fn def(kind: &'static str, names: &'static [NameSource]) -> DefinitionRule {
    DefinitionRule {
        kind,
        names,
        opens_scope: false,
        top_level_only: false,
        requires_field: None,
    }
}

const fn scoped(kind: &'static str, names: &'static [NameSource]) -> DefinitionRule {
    DefinitionRule {
        opens_scope: true,
        ..def(kind, names)
    }
}

const fn top_level(kind: &'static str, names: &'static [NameSource]) -> DefinitionRule {
    DefinitionRule {
        top_level_only: true,
        opens_scope: true,
        ..def(kind, names)
    }
}

const fn with_body(kind: &'static str, names: &'static [NameSource]) -> DefinitionRule {
    DefinitionRule {
        requires_field: Some("body"),
        ..def(kind, names)
    }
}

/// A nameless node that still hides its contents from module scope.
const fn scope_only(kind: &'static str) -> DefinitionRule {
    scoped(kind, NO_NAME)
}

const fn call(kind: &'static str, field: &'static str) -> ReferenceRule {
    ReferenceRule {
        kind,
        target: Target::Callee(Some(field)),
    }
}

const fn refer(kind: &'static str, target: Target) -> ReferenceRule {
    ReferenceRule { kind, target }
}

static RUST_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_item", NAME),
        def("function_signature_item", NAME),
        def("struct_item", NAME),
        def("enum_item", NAME),
        def("union_item", NAME),
        def("trait_item", NAME),
        def("type_item", NAME),
        def("mod_item", NAME),
        def("const_item", NAME),
        def("static_item", NAME),
        def("macro_definition", NAME),
    ],
    references: &[
        call("call_expression", "function"),
        call("macro_invocation", "macro"),
        call("scoped_identifier", "path"),
        refer("use_declaration", Target::Leaves),
        refer("type_identifier", Target::Itself),
    ],
};

static PYTHON_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_definition", NAME),
        scoped("class_definition", NAME),
        top_level("assignment", LEFT),
        scope_only("lambda"),
    ],
    references: &[
        call("call", "function"),
        refer("import_statement", Target::FieldLeaves("name")),
        refer("import_from_statement", Target::FieldLeaves("name")),
    ],
};

static JAVASCRIPT_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_declaration", NAME),
        scoped("generator_function_declaration", NAME),
        scoped("class_declaration", NAME),
        scoped("method_definition", NAME),
        top_level("variable_declarator", NAME),
        scope_only("arrow_function"),
        scope_only("function_expression"),
        scope_only("function"),
    ],
    references: &[
        call("call_expression", "function"),
        call("new_expression", "constructor"),
        refer("import_statement", Target::Leaves),
    ],
};

static TYPESCRIPT_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_declaration", NAME),
        scoped("generator_function_declaration", NAME),
        scoped("class_declaration", NAME),
        scoped("abstract_class_declaration", NAME),
        scoped("method_definition", NAME),
        def("function_signature", NAME),
        def("method_signature", NAME),
        def("abstract_method_signature", NAME),
        def("interface_declaration", NAME),
        def("type_alias_declaration", NAME),
        def("enum_declaration", NAME),
        top_level("variable_declarator", NAME),
        scope_only("arrow_function"),
        scope_only("function_expression"),
    ],
    references: &[
        call("call_expression", "function"),
        call("new_expression", "constructor"),
        refer("import_statement", Target::Leaves),
        refer("type_identifier", Target::Itself),
    ],
};

static GO_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_declaration", NAME),
        scoped("method_declaration", NAME),
        def("type_spec", NAME),
        top_level("const_spec", NAME),
        top_level("var_spec", NAME),
        scope_only("func_literal"),
    ],
    references: &[
        call("call_expression", "function"),
        refer("type_identifier", Target::Itself),
    ],
};

static JAVA_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("class_declaration", NAME),
        scoped("interface_declaration", NAME),
        scoped("enum_declaration", NAME),
        scoped("record_declaration", NAME),
        scoped("annotation_type_declaration", NAME),
        scoped("method_declaration", NAME),
        scoped("constructor_declaration", NAME),
    ],
    references: &[
        call("method_invocation", "name"),
        call("object_creation_expression", "type"),
        refer("import_declaration", Target::Leaves),
        refer("type_identifier", Target::Itself),
    ],
};

static C_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_definition", DECLARATOR),
        with_body("struct_specifier", NAME),
        with_body("union_specifier", NAME),
        with_body("enum_specifier", NAME),
        def("type_definition", DECLARATOR),
        def("preproc_def", NAME),
        def("preproc_function_def", NAME),
    ],
    references: &[
        call("call_expression", "function"),
        refer("type_identifier", Target::Itself),
    ],
};

static CPP_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_definition", DECLARATOR),
        with_body("struct_specifier", NAME),
        with_body("union_specifier", NAME),
        with_body("enum_specifier", NAME),
        with_body("class_specifier", NAME),
        def("namespace_definition", NAME),
        def("type_definition", DECLARATOR),
        def("alias_declaration", NAME),
        def("preproc_def", NAME),
        def("preproc_function_def", NAME),
        scope_only("lambda_expression"),
    ],
    references: &[
        call("call_expression", "function"),
        call("new_expression", "type"),
        refer("type_identifier", Target::Itself),
    ],
};

static RUBY_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("method", NAME),
        scoped("singleton_method", NAME),
        scoped("class", NAME),
        scoped("module", NAME),
        top_level("assignment", LEFT),
        scope_only("do_block"),
        scope_only("block"),
        scope_only("lambda"),
    ],
    references: &[call("call", "method")],
};

static PHP_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_definition", NAME),
        scoped("method_declaration", NAME),
        scoped("class_declaration", NAME),
        scoped("interface_declaration", NAME),
        scoped("trait_declaration", NAME),
        scoped("enum_declaration", NAME),
    ],
    references: &[
        call("function_call_expression", "function"),
        call("member_call_expression", "name"),
        call("scoped_call_expression", "name"),
        refer("object_creation_expression", Target::Callee(None)),
        refer("namespace_use_declaration", Target::Leaves),
    ],
};

static KOTLIN_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_declaration", KOTLIN_NAME),
        scoped("class_declaration", KOTLIN_NAME),
        scoped("object_declaration", KOTLIN_NAME),
    ],
    references: &[refer("call_expression", Target::Callee(None))],
};

static SWIFT_RULES: LanguageRules = LanguageRules {
    definitions: &[
        scoped("function_declaration", SWIFT_NAME),
        scoped("class_declaration", SWIFT_NAME),
        scoped("protocol_declaration", SWIFT_NAME),
        def("protocol_function_declaration", SWIFT_NAME),
    ],
    references: &[refer("call_expression", Target::Callee(None))],
};

fn rules_for(language: Language) -> Option<&'static LanguageRules> {
    match language {
        Language::Rust => Some(&RUST_RULES),
        Language::Python => Some(&PYTHON_RULES),
        Language::JavaScript => Some(&JAVASCRIPT_RULES),
        Language::TypeScript => Some(&TYPESCRIPT_RULES),
        Language::Go => Some(&GO_RULES),
        Language::Java => Some(&JAVA_RULES),
        Language::C => Some(&C_RULES),
        Language::Cpp => Some(&CPP_RULES),
        Language::Ruby => Some(&RUBY_RULES),
        Language::Php => Some(&PHP_RULES),
        Language::Kotlin => Some(&KOTLIN_RULES),
        Language::Swift => Some(&SWIFT_RULES),
        Language::CSharp | Language::Scala | Language::Unknown => None,
    }
}

/// Node kinds whose text is a bare identifier.
const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "simple_identifier",
    "namespace_identifier",
    "constant",
    "name",
];

/// Qualified names whose last segment is the `name` field.
const PATH_KINDS: &[&str] = &[
    "scoped_identifier",
    "qualified_identifier",
    "scope_resolution",
    "scoped_type_identifier",
];

/// Fields probed, in order, when looking for the name a callee resolves to.
const CALLEE_FIELDS: &[&str] = &[
    "name",
    "field",
    "property",
    "attribute",
    "method",
    "function",
];

fn collect_tags(
    tree: &Tree,
    source: &[u8],
    rules: &LanguageRules,
    file: &str,
    language: Language,
) -> Vec<Tag> {
    let mut tags = Vec::new();
    let mut definition_names: HashSet<usize> = HashSet::new();

    // Explicit stack: deeply nested expressions must not overflow the call stack
    let mut stack: Vec<(Node, usize)> = vec![(tree.root_node(), 0)];
    while let Some((node, depth)) = stack.pop() {
        let mut child_depth = depth;

        if let Some(rule) = rules.definition(node.kind()) {
            if applies(rule, &node, depth) {
                if let Some(name_node) = definition_name(rule, &node) {
                    if let Some(name) = identifier_text(&name_node, source) {
                        definition_names.insert(name_node.id());
                        tags.push(make_tag(file, name, TagKind::Definition, &name_node, language));
                    }
                }
                if rule.opens_scope {
                    child_depth += 1;
                }
            }
        }

        let mut descend = true;
        if let Some(rule) = rules.reference(node.kind()) {
            if !definition_names.contains(&node.id()) {
                for name_node in reference_names(&rule.target, &node) {
                    if definition_names.contains(&name_node.id()) {
                        continue;
                    }
                    if let Some(name) = identifier_text(&name_node, source) {
                        tags.push(make_tag(file, name, TagKind::Reference, &name_node, language));
                    }
                }
            }
            if matches!(rule.target, Target::Leaves | Target::FieldLeaves(_)) {
                descend = false;
            }
        }

        if descend {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            for child in children.into_iter().rev() {
                stack.push((child, child_depth));
            }
        }
    }

    tags.sort_by_key(|t| t.line);
    tags
}

fn applies(rule: &DefinitionRule, node: &Node, depth: usize) -> bool {
    if rule.top_level_only && depth > 0 {
        return false;
    }
    match rule.requires_field {
        Some(field) => node.child_by_field_name(field).is_some(),
        None => true,
    }
}

fn make_tag(file: &str, name: String, kind: TagKind, node: &Node, language: Language) -> Tag {
    let line = u32::try_from(node.start_position().row + 1).unwrap_or(u32::MAX);
    Tag {
        file: file.to_string(),
        name,
        kind,
        line,
        language,
    }
}

fn definition_name<'t>(rule: &DefinitionRule, node: &Node<'t>) -> Option<Node<'t>> {
    rule.names.iter().find_map(|source| {
        let found = match source {
            NameSource::Field(field) => node.child_by_field_name(field),
            NameSource::Child(kind) => first_child_of_kind(node, kind),
            NameSource::Declarator => declarator_name(node),
        }?;
        last_path_segment(found)
    })
}

fn first_child_of_kind<'t>(node: &Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

/// Strip qualification (`Foo::bar`, `A::B`) down to the final identifier.
fn last_path_segment(node: Node) -> Option<Node> {
    let mut current = node;
    for _ in 0..MAX_NAME_DEPTH {
        if IDENTIFIER_KINDS.contains(&current.kind()) {
            return Some(current);
        }
        if !PATH_KINDS.contains(&current.kind()) {
            return None;
        }
        current = current.child_by_field_name("name")?;
    }
    None
}

fn declarator_name<'t>(node: &Node<'t>) -> Option<Node<'t>> {
    let mut current = node.child_by_field_name("declarator")?;
    for _ in 0..MAX_NAME_DEPTH {
        match current.kind() {
            "identifier" | "field_identifier" | "type_identifier" => return Some(current),
            "qualified_identifier" => current = current.child_by_field_name("name")?,
            _ => {
                current = current
                    .child_by_field_name("declarator")
                    .or_else(|| current.named_child(0))?;
            }
        }
    }
    None
}

fn reference_names<'t>(target: &Target, node: &Node<'t>) -> Vec<Node<'t>> {
    match target {
        Target::Callee(field) => {
            let start = match field {
                Some(f) => node.child_by_field_name(f),
                None => node.named_child(0),
            };
            start.and_then(callee_identifier).into_iter().collect()
        }
        Target::Itself => vec![*node],
        Target::Leaves => identifier_leaves(node),
        Target::FieldLeaves(field) => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.children_by_field_name(field, &mut cursor).collect();
            children.iter().flat_map(identifier_leaves).collect()
        }
    }
}

/// The identifier a call target ultimately names (`a.b.c()` -> `c`).
fn callee_identifier(node: Node) -> Option<Node> {
    let mut current = node;
    for _ in 0..MAX_NAME_DEPTH {
        if IDENTIFIER_KINDS.contains(&current.kind()) {
            return Some(current);
        }
        let next = CALLEE_FIELDS
            .iter()
            .find_map(|f| current.child_by_field_name(f))
            .or_else(|| {
                let count = current.named_child_count();
                count.checked_sub(1).and_then(|i| current.named_child(i))
            })?;
        current = next;
    }
    None
}

fn identifier_leaves<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let mut stack = vec![*node];
    while let Some(current) = stack.pop() {
        if IDENTIFIER_KINDS.contains(&current.kind()) {
            found.push(current);
            continue;
        }
        let mut cursor = current.walk();
        let children: Vec<Node> = current.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    found
}

fn identifier_text(node: &Node, source: &[u8]) -> Option<String> {
    let text = node.utf8_text(source).ok()?;
    is_identifier(text).then(|| text.to_string())
}

/// Whether `text` looks like a plain identifier in any supported language.
pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
