//! Lexical scoping: which definitions are visible from a given sentence.
//!
//! Each sentence that introduces names carries a [`ScopeDeclaration`]
//! recording the symbols it defines and whether it opens or closes a
//! section/module scope. Name resolution walks backward through the
//! sentence chain, narrowing visibility as scope boundaries are crossed:
//! private symbols are visible only from the declaring sentence itself,
//! local symbols only until the enclosing scope ends.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::lexer::strip_leading_trivia;

/// A possibly-qualified identifier, outermost component first.
pub type QualId = Vec<String>;

/// Resolve `id2` against the scope path `id1`: if `id2` is a suffix-
/// compatible path, return the combined absolute id.
pub fn resolve_qual_id(id1: &[String], id2: &[String]) -> Option<QualId> {
	if id2.len() > id1.len() {
		return None;
	}
	let mut idx = 1;
	while idx <= id2.len() {
		if id1[id1.len() - idx] != id2[id2.len() - idx] {
			return None;
		}
		idx += 1;
	}
	let mut combined = id1[..id1.len() + 1 - idx].to_vec();
	combined.extend_from_slice(id2);
	Some(combined)
}

/// Outcome of matching two qualified ids against each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualIdMatch {
	/// Which argument was the shorter (and thus relative) one.
	pub which: usize,
	/// The unmatched leading components of the longer id.
	pub prefix: QualId,
	/// The shorter id.
	pub id: QualId,
}

/// Match a relative id against an absolute one, in either order.
pub fn match_qual_id(x: &[String], y: &[String]) -> Option<QualIdMatch> {
	let (which, shorter, longer) = if x.len() > y.len() { (1, y, x) } else { (0, x, y) };
	let mut idx = 1;
	while idx <= shorter.len() {
		if shorter[shorter.len() - idx] != longer[longer.len() - idx] {
			return None;
		}
		idx += 1;
	}
	Some(QualIdMatch {
		which,
		prefix: longer[..longer.len() + 1 - idx].to_vec(),
		id: shorter.to_vec(),
	})
}

/// What kind of definition a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
	Definition,
	Class,
	Inductive,
	Constructor,
	Module,
	Let,
	Section,
	Ltac,
	Assumption,
}

/// A name introduced by a sentence, with its character range in the
/// document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
	pub identifier: String,
	pub range: Range<usize>,
	pub kind: SymbolKind,
}

/// Which symbol lists a lookup may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeFlags(u8);

impl ScopeFlags {
	pub const PRIVATE: ScopeFlags = ScopeFlags(1 << 0);
	pub const LOCAL: ScopeFlags = ScopeFlags(1 << 1);
	pub const EXPORT: ScopeFlags = ScopeFlags(1 << 2);
	pub const ALL: ScopeFlags = ScopeFlags(0b111);

	pub fn contains(self, other: ScopeFlags) -> bool {
		self.0 & other.0 != 0
	}

	#[must_use]
	pub fn without(self, other: ScopeFlags) -> ScopeFlags {
		ScopeFlags(self.0 & !other.0)
	}
}

/// Whether a sentence opens or closes a named scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeNode {
	Begin { name: String, exports: bool },
	End { name: String },
}

/// The scoping contribution of one sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDeclaration {
	/// Path components this scope adds to names defined inside it.
	pub qual_id: QualId,
	pub node: Option<ScopeNode>,
	/// Visible only to lookups starting at the declaring sentence.
	private_symbols: Vec<Symbol>,
	/// Visible to subsequent siblings within the enclosing scope.
	local_symbols: Vec<Symbol>,
	/// Visible beyond the enclosing scope.
	export_symbols: Vec<Symbol>,
}

/// A resolved symbol: where it was found and under what full name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolMatch {
	pub symbol: Symbol,
	pub id: QualId,
	/// Scope components assumed rather than written in the query.
	pub assumed_prefix: QualId,
}

impl ScopeDeclaration {
	pub fn is_begin(&self, name: Option<&str>) -> bool {
		matches!(&self.node, Some(ScopeNode::Begin { name: n, .. }) if name.is_none_or(|q| q == n))
	}

	pub fn is_end(&self, name: Option<&str>) -> bool {
		matches!(&self.node, Some(ScopeNode::End { name: n }) if name.is_none_or(|q| q == n))
	}

	pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
		self.private_symbols
			.iter()
			.chain(&self.local_symbols)
			.chain(&self.export_symbols)
	}

	fn lookup_in_list(&self, id: &[String], symbols: &[Symbol]) -> Option<SymbolMatch> {
		let matched = match_qual_id(&id[..id.len() - 1], &self.qual_id)?;
		let assumed_prefix = if matched.which == 1 { matched.prefix } else { Vec::new() };
		let last = id.last()?;
		symbols.iter().find(|s| &s.identifier == last).map(|s| {
			let mut full = matched.id.clone();
			full.push(s.identifier.clone());
			SymbolMatch {
				symbol: s.clone(),
				id: full,
				assumed_prefix,
			}
		})
	}

	/// Look `id` up in this declaration's own symbol lists.
	pub fn lookup_here(&self, id: &[String], flags: ScopeFlags) -> Option<SymbolMatch> {
		if id.is_empty() {
			return None;
		}
		if flags.contains(ScopeFlags::PRIVATE) {
			if let Some(found) = self.lookup_in_list(id, &self.private_symbols) {
				return Some(found);
			}
		}
		if flags.contains(ScopeFlags::LOCAL) {
			if let Some(found) = self.lookup_in_list(id, &self.local_symbols) {
				return Some(found);
			}
		}
		if flags.contains(ScopeFlags::EXPORT) {
			if let Some(found) = self.lookup_in_list(id, &self.export_symbols) {
				return Some(found);
			}
		}
		None
	}
}

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_']*";

macro_rules! scope_re {
	($name:ident, $pattern:expr) => {
		static $name: LazyLock<Regex> =
			LazyLock::new(|| Regex::new(&$pattern.replace("IDENT", IDENT)).expect("static regex"));
	};
}

scope_re!(SECTION_RE, r"^Section\s+(IDENT)");
scope_re!(END_RE, r"^End\s+(IDENT)");
scope_re!(
	MODULE_RE,
	r"^Module(\s+Type)?(?:\s+(Import|Export))?\s+(IDENT)"
);
scope_re!(
	DEFINITION_RE,
	r"^(?:Program\s+|Local\s+|Global\s+)?(?:Definition|Lemma|Theorem|Corollary|Fact|Remark|Example|Fixpoint|CoFixpoint|Instance)\s+(IDENT)"
);
scope_re!(INDUCTIVE_RE, r"^(?:Co)?Inductive\s+(IDENT)");
scope_re!(LTAC_RE, r"^Ltac\s+(IDENT)");
scope_re!(LET_RE, r"^Let\s+(IDENT)");
scope_re!(
	ASSUMPTION_RE,
	r"^(?:Hypothesis|Hypotheses|Variables?|Axioms?|Parameters?|Conjecture)\s+((?:IDENT[\s,]*)+)"
);
scope_re!(IDENT_RE, r"IDENT");

/// Extract the scoping contribution of a sentence from its text.
///
/// Deliberately lexical: it recognizes the command keyword and the
/// immediately following identifier(s), which is all name resolution
/// needs. Returns `None` for sentences that neither define names nor
/// delimit scopes.
pub fn parse_scope(text: &str, base_offset: usize) -> Option<ScopeDeclaration> {
	let (body, stripped) = strip_leading_trivia(text);
	let base = base_offset + stripped;
	let symbol = |m: &regex::Match<'_>, kind: SymbolKind| {
		let start = base + body[..m.start()].chars().count();
		Symbol {
			identifier: m.as_str().to_owned(),
			range: start..start + m.as_str().chars().count(),
			kind,
		}
	};

	if let Some(caps) = SECTION_RE.captures(body) {
		let name = caps.get(1).expect("group");
		let mut decl = ScopeDeclaration {
			qual_id: Vec::new(),
			node: Some(ScopeNode::Begin {
				name: name.as_str().to_owned(),
				exports: true,
			}),
			..ScopeDeclaration::default()
		};
		decl.private_symbols.push(symbol(&name, SymbolKind::Section));
		return Some(decl);
	}
	if let Some(caps) = END_RE.captures(body) {
		return Some(ScopeDeclaration {
			node: Some(ScopeNode::End {
				name: caps.get(1).expect("group").as_str().to_owned(),
			}),
			..ScopeDeclaration::default()
		});
	}
	if let Some(caps) = MODULE_RE.captures(body) {
		let name = caps.get(3).expect("group");
		let is_type = caps.get(1).is_some();
		let exports = caps.get(2).is_some_and(|m| m.as_str() == "Export");
		// `Module M := N.` binds a name without opening a scope.
		let binds = body.contains(":=");
		let mut decl = ScopeDeclaration {
			qual_id: if binds { Vec::new() } else { vec![name.as_str().to_owned()] },
			node: (!binds).then(|| ScopeNode::Begin {
				name: name.as_str().to_owned(),
				exports: exports && !is_type,
			}),
			..ScopeDeclaration::default()
		};
		decl.export_symbols.push(symbol(&name, SymbolKind::Module));
		return Some(decl);
	}
	if let Some(caps) = INDUCTIVE_RE.captures(body) {
		let mut decl = ScopeDeclaration::default();
		decl.export_symbols
			.push(symbol(&caps.get(1).expect("group"), SymbolKind::Inductive));
		return Some(decl);
	}
	if let Some(caps) = DEFINITION_RE.captures(body) {
		let mut decl = ScopeDeclaration::default();
		decl.export_symbols
			.push(symbol(&caps.get(1).expect("group"), SymbolKind::Definition));
		return Some(decl);
	}
	if let Some(caps) = LTAC_RE.captures(body) {
		let mut decl = ScopeDeclaration::default();
		decl.export_symbols
			.push(symbol(&caps.get(1).expect("group"), SymbolKind::Ltac));
		return Some(decl);
	}
	if let Some(caps) = LET_RE.captures(body) {
		let mut decl = ScopeDeclaration::default();
		decl.local_symbols
			.push(symbol(&caps.get(1).expect("group"), SymbolKind::Let));
		return Some(decl);
	}
	if let Some(caps) = ASSUMPTION_RE.captures(body) {
		let idents = caps.get(1).expect("group");
		let mut decl = ScopeDeclaration::default();
		for m in IDENT_RE.find_iter(idents.as_str()) {
			let start = base
				+ body[..idents.start() + m.start()].chars().count();
			decl.local_symbols.push(Symbol {
				identifier: m.as_str().to_owned(),
				range: start..start + m.as_str().chars().count(),
				kind: SymbolKind::Assumption,
			});
		}
		return Some(decl);
	}
	None
}

/// Resolve `id` by walking scopes backward from the query site.
///
/// `scopes` must yield the declaration of the query sentence first, then
/// each preceding sentence's declaration in reverse document order,
/// tagged with an opaque source handle. Visibility narrows as the walk
/// crosses scope boundaries, mirroring how an `End` hides the local
/// names of the scope it closes.
pub fn lookup<S: Copy>(
	scopes: impl Iterator<Item = (S, ScopeDeclaration)>,
	id: &[String],
	mut flags: ScopeFlags,
) -> Vec<(S, SymbolMatch)> {
	let mut results = Vec::new();
	let mut flag_stack: Vec<ScopeFlags> = Vec::new();
	for (source, scope) in scopes {
		if let Some(found) = scope.lookup_here(id, flags) {
			results.push((source, found));
		}
		// Private names are visible only from the declaring sentence.
		flags = flags.without(ScopeFlags::PRIVATE);

		if scope.is_end(None) {
			flag_stack.push(flags);
			flags = flags.without(ScopeFlags::LOCAL);
		} else if scope.is_begin(None) {
			if let Some(previous) = flag_stack.pop() {
				flags = previous;
			}
		}
	}
	results
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn ids(parts: &[&str]) -> Vec<String> {
		parts.iter().map(|s| (*s).to_owned()).collect()
	}

	#[test]
	fn test_resolve_qual_id_aligns_suffixes() {
		assert_eq!(
			resolve_qual_id(&ids(&["A", "B"]), &ids(&["B"])),
			Some(ids(&["A", "B"]))
		);
		// Components are compared aligned at the ends; an id that only
		// overlaps mid-path does not resolve.
		assert_eq!(resolve_qual_id(&ids(&["A", "B"]), &ids(&["B", "c"])), None);
		assert_eq!(resolve_qual_id(&ids(&["A"]), &ids(&["B", "c"])), None);
	}

	#[test]
	fn test_resolve_qual_id_equal_lengths() {
		assert_eq!(
			resolve_qual_id(&ids(&["A", "b"]), &ids(&["A", "b"])),
			Some(ids(&["A", "b"]))
		);
	}

	#[test]
	fn test_match_qual_id_reports_prefix() {
		let matched = match_qual_id(&ids(&["x"]), &ids(&["M", "x"])).expect("match");
		assert_eq!(matched.which, 0);
		assert_eq!(matched.prefix, ids(&["M"]));
		assert_eq!(match_qual_id(&ids(&["y"]), &ids(&["M", "x"])), None);
	}

	#[test]
	fn test_match_qual_id_equal_lengths() {
		// An unqualified id matched against itself has an empty prefix.
		let matched = match_qual_id(&ids(&["x"]), &ids(&["x"])).expect("match");
		assert_eq!(matched.prefix, Vec::<String>::new());
		assert_eq!(matched.id, ids(&["x"]));
		assert_eq!(match_qual_id(&ids(&["x"]), &ids(&["y"])), None);
	}

	#[test]
	fn test_parse_section_opens_scope() {
		let decl = parse_scope("Section Foo.", 0).expect("scope");
		assert!(decl.is_begin(Some("Foo")));
		assert_eq!(decl.qual_id, Vec::<String>::new());
	}

	#[test]
	fn test_parse_module_adds_path_component() {
		let decl = parse_scope("Module Export M.", 0).expect("scope");
		assert!(decl.is_begin(Some("M")));
		assert_eq!(decl.qual_id, ids(&["M"]));
		let symbols: Vec<_> = decl.symbols().collect();
		assert_eq!(symbols[0].kind, SymbolKind::Module);
	}

	#[test]
	fn test_module_binding_does_not_open_scope() {
		let decl = parse_scope("Module M := N.", 0).expect("scope");
		assert!(!decl.is_begin(None));
		assert_eq!(decl.symbols().count(), 1);
	}

	#[test]
	fn test_parse_definition_symbol_range() {
		let decl = parse_scope("  Definition double (n : nat) := n + n.", 10).expect("scope");
		let symbol = decl.symbols().next().expect("symbol");
		assert_eq!(symbol.identifier, "double");
		// 10 + two spaces + "Definition ".
		assert_eq!(symbol.range, 23..29);
	}

	#[test]
	fn test_parse_assumptions_collects_all_idents() {
		let decl = parse_scope("Variables x y z : nat.", 0).expect("scope");
		let names: Vec<_> = decl.symbols().map(|s| s.identifier.as_str()).collect();
		assert_eq!(names, vec!["x", "y", "z"]);
	}

	#[test]
	fn test_parse_tactic_sentence_has_no_scope() {
		assert_eq!(parse_scope("intros; auto.", 0), None);
	}

	#[test]
	fn test_lookup_hides_locals_past_scope_end() {
		// Document order: Section S. Variable x. End S. <query>
		// Reverse walk from the query: End, Variable, Section.
		let backward = vec![
			(2usize, parse_scope("End S.", 0).expect("scope")),
			(1, parse_scope("Variable x : nat.", 0).expect("scope")),
			(0, parse_scope("Section S.", 0).expect("scope")),
		];
		let hits = lookup(backward.into_iter(), &ids(&["x"]), ScopeFlags::ALL);
		assert!(hits.is_empty(), "section-local variable leaked: {hits:?}");
	}

	#[test]
	fn test_lookup_sees_locals_inside_scope() {
		// Document order: Section S. Variable x. <query>
		let backward = vec![
			(1usize, parse_scope("Variable x : nat.", 0).expect("scope")),
			(0, parse_scope("Section S.", 0).expect("scope")),
		];
		let hits = lookup(backward.into_iter(), &ids(&["x"]), ScopeFlags::ALL);
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].0, 1);
		assert_eq!(hits[0].1.symbol.kind, SymbolKind::Assumption);
	}

	#[test]
	fn test_lookup_qualified_module_member() {
		// Document order: Module M. Definition d. End M. <query M.d>
		let backward = vec![
			(2usize, parse_scope("End M.", 0).expect("scope")),
			(1, {
				let mut decl = parse_scope("Definition d := 1.", 0).expect("scope");
				decl.qual_id = ids(&["M"]);
				decl
			}),
			(0, parse_scope("Module M.", 0).expect("scope")),
		];
		let hits = lookup(backward.into_iter(), &ids(&["M", "d"]), ScopeFlags::ALL);
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].1.id, ids(&["M", "d"]));
	}
}
