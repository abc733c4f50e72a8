//! Semantic analysis.
//!
//! Errors accumulate in the diagnostics collector so the user sees the whole
//! batch; the driver stops before IR generation if any error was emitted.

use crate::common::{Id, Map};
use crate::diag::{Diagnostics, SourceLocation, SourceManager};

use super::ast::*;

/// Largest magnitude a literal may have; `2147483648` is only legal directly
/// under a unary minus.
const INT_MIN_MAGNITUDE: i64 = 1 << 31;

struct Symbol {
    loc: SourceLocation,
    initialized: bool,
}

#[derive(Default)]
struct Scope {
    symbols: Map<Id, Symbol>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VarState {
    Ready,
    Uninitialized,
    Undeclared,
}

struct Sema<'s> {
    scopes: Vec<Scope>,
    sources: &'s SourceManager,
    diags: &'s mut Diagnostics,
    has_return: bool,
}

/// Check `program`, appending findings to `diags`.
pub fn analyze(program: &Program<'_>, sources: &SourceManager, diags: &mut Diagnostics) {
    let mut sema = Sema {
        scopes: vec![Scope::default()],
        sources,
        diags,
        has_return: false,
    };
    sema.check_function(&program.func);
}

impl Sema<'_> {
    fn error(&mut self, loc: SourceLocation, message: String) {
        self.diags.emit_error(loc, message);
        if let Some(snippet) = self.sources.snippet(&loc) {
            self.diags.add_source_context(snippet.to_owned());
        }
    }

    fn note(&mut self, loc: SourceLocation, message: String) {
        self.diags.emit_note(loc, message);
        if let Some(snippet) = self.sources.snippet(&loc) {
            self.diags.add_source_context(snippet.to_owned());
        }
    }

    // Innermost declaration wins.
    fn var_state(&self, name: Id) -> VarState {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.symbols.get(&name) {
                return if symbol.initialized { VarState::Ready } else { VarState::Uninitialized };
            }
        }
        VarState::Undeclared
    }

    /// Returns false when `name` is not declared in any enclosing scope.
    fn mark_initialized(&mut self, name: Id) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(symbol) = scope.symbols.get_mut(&name) {
                symbol.initialized = true;
                return true;
            }
        }
        false
    }

    fn check_function(&mut self, func: &Function<'_>) {
        self.check_block(&func.body);
        if !self.has_return {
            self.error(func.loc, format!("function '{}' has no return statement", func.name));
            self.diags.suggest_fix("add a 'return <value>;' before the closing brace");
        }
    }

    fn check_block(&mut self, stmts: &[Stmt<'_>]) {
        self.scopes.push(Scope::default());
        for stmt in stmts {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &Stmt<'_>) {
        match stmt {
            Stmt::Declare { name, init, loc } => {
                if let Some(init) = init {
                    self.check_expr(init, false);
                }
                let scope = self.scopes.last_mut().expect("scope stack is never empty");
                if let Some(previous) = scope.symbols.get(name) {
                    let previous_loc = previous.loc;
                    self.error(*loc, format!("redeclaration of '{name}'"));
                    self.note(previous_loc, format!("'{name}' previously declared here"));
                } else {
                    scope.symbols.insert(
                        *name,
                        Symbol { loc: *loc, initialized: init.is_some() },
                    );
                }
            }
            Stmt::Assign { name, value, loc } => {
                self.check_expr(value, false);
                if !self.mark_initialized(*name) {
                    self.error(*loc, format!("assignment to undeclared variable '{name}'"));
                    self.diags.suggest_fix(format!("declare it first: 'int {name} = ...;'"));
                }
            }
            Stmt::Return { value, .. } => {
                self.check_expr(value, false);
                self.has_return = true;
            }
            Stmt::If { cond, then_body, else_body, loc } => {
                self.check_condition(cond, *loc);
                self.check_block(then_body);
                self.check_block(else_body);
            }
            Stmt::While { cond, body, loc } => {
                self.check_condition(cond, *loc);
                self.check_block(body);
            }
        }
    }

    // Conditions must be comparisons; the target lowering has no notion of
    // truthiness for plain integers.
    fn check_condition(&mut self, cond: &Expr<'_>, stmt_loc: SourceLocation) {
        match cond {
            Expr::BOp { op: BOp::Lt, lhs, rhs, .. } => {
                self.check_expr(lhs, false);
                self.check_expr(rhs, false);
            }
            _ => {
                self.error(stmt_loc, "condition must be a comparison".to_owned());
                self.check_expr(cond, false);
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr<'_>, negated: bool) {
        match expr {
            Expr::Num { value, loc } => {
                let limit = if negated { INT_MIN_MAGNITUDE } else { INT_MIN_MAGNITUDE - 1 };
                if *value > limit {
                    self.error(*loc, format!("integer literal {value} out of signed 32-bit range"));
                }
            }
            Expr::Var { name, loc } => match self.var_state(*name) {
                VarState::Ready => {}
                VarState::Uninitialized => {
                    self.error(*loc, format!("use of uninitialized variable '{name}'"));
                }
                VarState::Undeclared => {
                    self.error(*loc, format!("use of undeclared variable '{name}'"));
                }
            },
            Expr::Negate { operand, .. } => self.check_expr(operand, true),
            Expr::BOp { op, lhs, rhs, loc } => {
                if *op == BOp::Lt {
                    // Comparisons only exist in condition position.
                    self.error(*loc, "comparison cannot be used as a value".to_owned());
                }
                self.check_expr(lhs, false);
                self.check_expr(rhs, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::arena::Arena;
    use crate::front::parse::parse;

    fn check(source: &str) -> Diagnostics {
        let arena = Arena::new();
        let file = Id::new("test.c".into());
        let program = parse(&arena, file, source).unwrap();
        let sources = SourceManager::new(source, file);
        let mut diags = Diagnostics::new();
        analyze(&program, &sources, &mut diags);
        diags
    }

    #[test]
    fn clean_program_has_no_findings() {
        let diags = check("int main() { int a = 7; int b = a - 2; return b + a; }");
        assert!(!diags.has_errors());
        assert!(diags.records().is_empty());
    }

    #[test]
    fn undeclared_and_uninitialized_uses() {
        let diags = check("int main() { int a; int b = c; return a; }");
        assert_eq!(diags.error_count(), 2);
        let messages: Vec<&str> = diags.records().iter().map(|d| d.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("undeclared variable 'c'")));
        assert!(messages.iter().any(|m| m.contains("uninitialized variable 'a'")));
    }

    #[test]
    fn redeclaration_gets_error_and_note() {
        let diags = check("int main() { int a = 1; int a = 2; return a; }");
        assert_eq!(diags.error_count(), 1);
        assert!(diags.records().iter().any(|d| d.message.contains("previously declared")));
    }

    #[test]
    fn errors_accumulate_as_a_batch() {
        let diags = check("int main() { x = 1; y = 2; return z; }");
        assert_eq!(diags.error_count(), 3);
    }

    #[test]
    fn literal_range_respects_unary_minus() {
        assert!(!check("int main() { return -2147483648; }").has_errors());
        assert!(check("int main() { return 2147483648; }").has_errors());
        assert!(check("int main() { return -2147483649; }").has_errors());
        assert!(!check("int main() { return 2147483647; }").has_errors());
    }

    #[test]
    fn missing_return_is_reported() {
        let diags = check("int main() { int a = 1; }");
        assert!(diags.has_errors());
        assert!(diags.records()[0].message.contains("no return statement"));
    }

    #[test]
    fn shadowing_in_inner_scope_is_allowed() {
        let diags = check(
            "int main() { int a = 1; if (a < 2) { int a = 3; a = a + 1; } return a; }",
        );
        assert!(!diags.has_errors());
    }
}
