//! Module parsing for the context `parse` operation.
//!
//! Backed by the OXC parser. Plugins get an owned summary of the module's
//! import/export structure rather than the arena-allocated AST, which cannot
//! outlive the parse call.

use oxc_allocator::Allocator;
use oxc_ast::ast::Statement;
use oxc_parser::{Parser, ParserReturn};
use oxc_span::SourceType;
use skiff_common::{offset_to_pos, Error, ErrorLoc, PluginError, Result};

/// Owned summary of a parsed module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleStructure {
    /// Import specifiers in source order.
    pub imports: Vec<String>,
    /// Re-export sources (`export ... from "x"`).
    pub reexports: Vec<String>,
    pub has_default_export: bool,
    pub has_named_exports: bool,
}

/// Parse `code` and extract its module structure.
///
/// Syntax errors surface as a [`PluginError`] carrying the offending
/// position so hook-error enrichment can frame it.
pub fn parse_module(code: &str) -> Result<ModuleStructure> {
    let allocator = Allocator::default();

    // TypeScript-looking code gets the TS grammar, everything else plain ESM.
    let source_type = if code.contains(": ") || code.contains("interface ") {
        SourceType::ts()
    } else {
        SourceType::mjs()
    };

    let ParserReturn {
        program, errors, ..
    } = Parser::new(&allocator, code, source_type).parse();

    if let Some(error) = errors.first() {
        let mut plugin_error = PluginError::new(format!("parse error: {}", error.message));
        if let Some(label) = error.labels.as_ref().and_then(|labels| labels.first()) {
            plugin_error.pos = Some(label.offset());
            if let Some((line, column)) = offset_to_pos(code, label.offset()) {
                plugin_error.loc = Some(ErrorLoc {
                    file: None,
                    line,
                    column,
                });
            }
        }
        return Err(Error::plugin(plugin_error));
    }

    let mut structure = ModuleStructure::default();
    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(import) => {
                structure.imports.push(import.source.value.to_string());
            }
            Statement::ExportNamedDeclaration(export) => {
                structure.has_named_exports = true;
                if let Some(source) = &export.source {
                    structure.reexports.push(source.value.to_string());
                }
            }
            Statement::ExportAllDeclaration(export) => {
                structure.has_named_exports = true;
                structure.reexports.push(export.source.value.to_string());
            }
            Statement::ExportDefaultDeclaration(_) => {
                structure.has_default_export = true;
            }
            _ => {}
        }
    }
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_imports_in_order() {
        let code = "import a from './a'\nimport { b } from './b'\nconst x = 1";
        let structure = parse_module(code).unwrap();
        assert_eq!(structure.imports, ["./a", "./b"]);
    }

    #[test]
    fn test_detects_exports() {
        let code = "export const a = 1\nexport default a\nexport * from './c'";
        let structure = parse_module(code).unwrap();
        assert!(structure.has_named_exports);
        assert!(structure.has_default_export);
        assert_eq!(structure.reexports, ["./c"]);
    }

    #[test]
    fn test_typescript_syntax_parses() {
        let code = "interface P { x: number }\nexport const p: P = { x: 1 }";
        assert!(parse_module(code).is_ok());
    }

    #[test]
    fn test_syntax_error_carries_position() {
        let err = parse_module("import { from './broken'").unwrap_err();
        let plugin_error = err.as_plugin().expect("parse errors are plugin errors");
        assert!(plugin_error.message.contains("parse error"));
        assert!(plugin_error.pos.is_some() || plugin_error.loc.is_some());
    }
}
