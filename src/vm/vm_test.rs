//! Tests for the compiler and VM, driven through Lisp source.
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::compiler::CODE;
use crate::data::print::pr_str;
use crate::data::Value;
use crate::error::ErrorKind;
use crate::vm::Op;
use crate::{Config, Runtime};

fn bare() -> Runtime {
    Runtime::new(Config::default().with_heap_words(1 << 14).without_prelude())
        .expect("runtime should start")
}

fn with_prelude() -> Runtime {
    Runtime::new(Config::default().with_heap_words(1 << 16)).expect("runtime should start")
}

/// Evaluate `src` and print the result.
fn eval(rt: &Runtime, src: &str) -> String {
    match rt.eval_str(src) {
        Ok(v) => pr_str(rt.store(), v),
        Err(e) => panic!("unexpected error evaluating {src}: {}", e.report()),
    }
}

fn eval_err(rt: &Runtime, src: &str) -> ErrorKind {
    match rt.eval_str(src) {
        Ok(v) => panic!("expected {src} to fail, got {}", pr_str(rt.store(), v)),
        Err(e) => e.kind,
    }
}

#[derive(Clone, Default)]
struct Captured(Rc<RefCell<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn if_selects_branch() {
    let rt = bare();
    assert_eq!(eval(&rt, "(if (< 1 2) 10 20)"), "10");
    assert_eq!(eval(&rt, "(if (> 1 2) 10 20)"), "20");
    assert_eq!(eval(&rt, "(if nil 10)"), "nil");
}

#[test]
fn progn_and_setq() {
    let rt = bare();
    assert_eq!(eval(&rt, "(progn (setq x 5) (+ x x))"), "10");
    assert_eq!(eval(&rt, "x"), "5");
    assert_eq!(eval(&rt, "(progn)"), "nil");
}

#[test]
fn arithmetic() {
    let rt = bare();
    assert_eq!(eval(&rt, "(- (* 6 7) (/ 10 3))"), "39");
    assert_eq!(eval(&rt, "(mod -7 3)"), "2");
    assert_eq!(eval_err(&rt, "(/ 1 0)"), ErrorKind::TypeMismatch);
    assert_eq!(eval_err(&rt, "(+ 1 'a)"), ErrorKind::TypeMismatch);
}

#[test]
fn shadowed_let_uses_innermost_binding() {
    let rt = bare();
    assert_eq!(eval(&rt, "(let ((x 1)) (let ((x 2)) x))"), "2");
    assert_eq!(eval(&rt, "(let ((x 1)) (cons (let ((x 2)) x) x))"), "(2 . 1)");
}

#[test]
fn let_is_sequential() {
    let rt = bare();
    assert_eq!(eval(&rt, "(let ((a 1) (b (+ a 1))) (cons a b))"), "(1 . 2)");
    assert_eq!(eval(&rt, "(let (a (b 2)) (cons a b))"), "(nil . 2)");
}

#[test]
fn builtin_arity_is_enforced() {
    let rt = bare();
    assert_eq!(eval_err(&rt, "(car 1 2)"), ErrorKind::ArgCount);
    assert_eq!(eval_err(&rt, "(cons 1)"), ErrorKind::ArgCount);
    // Applied as a value, the check happens at run time.
    assert_eq!(eval_err(&rt, "(progn (setq f car) (f '(1) 2))"), ErrorKind::ArgCount);
    assert_eq!(eval(&rt, "(f '(1 2))"), "1");
}

#[test]
fn errors_name_their_source() {
    let rt = bare();
    eval(&rt, "(setq bad (lambda () (car 1)))");
    let err = rt.eval_str("(bad)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert!(err.positions.contains(&"(car 1)".to_owned()), "{:?}", err.positions);
    assert!(err.positions.contains(&"(bad)".to_owned()), "{:?}", err.positions);
}

#[test]
fn unbound_and_uncallable() {
    let rt = bare();
    assert_eq!(eval_err(&rt, "nowhere"), ErrorKind::Unbound);
    assert_eq!(eval_err(&rt, "(nowhere 1)"), ErrorKind::Unbound);
    assert_eq!(eval_err(&rt, "(5 1)"), ErrorKind::NotCallable);
    assert_eq!(eval_err(&rt, "(setq 5 1)"), ErrorKind::NotSymbol);
}

#[test]
fn lambda_lists() {
    let rt = with_prelude();
    eval(&rt, "(defun f (a &optional (b 10) &rest r) (list a b r))");
    assert_eq!(eval(&rt, "(f 1)"), "(1 10 nil)");
    assert_eq!(eval(&rt, "(f 1 2)"), "(1 2 nil)");
    assert_eq!(eval(&rt, "(f 1 2 3 4)"), "(1 2 (3 4))");

    eval(&rt, "(defun g (&key (size 3) color) (cons size color))");
    assert_eq!(eval(&rt, "(g :color 5)"), "(3 . 5)");
    assert_eq!(eval(&rt, "(g :size 1 :color 2)"), "(1 . 2)");
    assert_eq!(eval(&rt, "(g)"), "(3)");
    // An explicit nil is a value, not a missing key.
    assert_eq!(eval(&rt, "(g :size nil)"), "(nil)");
}

#[test]
fn argument_counts_are_checked() {
    let rt = bare();
    assert_eq!(eval_err(&rt, "((lambda (a b) a) 1)"), ErrorKind::ArgCount);
    assert_eq!(eval_err(&rt, "((lambda (a) a) 1 2)"), ErrorKind::ArgCount);
    assert_eq!(eval(&rt, "((lambda (a &optional b) b) 1)"), "nil");
}

#[test]
fn closures_capture_their_environment() {
    let rt = with_prelude();
    eval(
        &rt,
        "(defun make-counter () (let ((n 0)) (lambda () (setq n (+ n 1)))))",
    );
    eval(&rt, "(setq c1 (make-counter))");
    eval(&rt, "(setq c2 (make-counter))");
    eval(&rt, "(c1)");
    assert_eq!(eval(&rt, "(c1)"), "2");
    assert_eq!(eval(&rt, "(c2)"), "1");
}

#[test]
fn closures_compile_on_first_call() {
    let rt = bare();
    let f = rt.store().root(rt.eval_str("(setq id (lambda (x) x))").unwrap());
    assert!(f.get().is_closure());
    assert_eq!(rt.store().nth(f.get(), CODE), Value::NIL);
    assert_eq!(eval(&rt, "(id 7)"), "7");
    assert!(rt.store().nth(f.get(), CODE).is_vector());
}

#[test]
fn symbols_are_cached_as_references() {
    let rt = bare();
    eval(&rt, "(setq h (lambda () late))");
    assert_eq!(eval_err(&rt, "(h)"), ErrorKind::Unbound);
    eval(&rt, "(setq late 3)");
    assert_eq!(eval(&rt, "(h)"), "3");

    let store = rt.store();
    let h = rt.eval_str("h").unwrap();
    let code = store.vector_items(store.nth(h, CODE)).unwrap();
    let late = rt.intern("late").unwrap();
    assert!(!code.contains(&late), "symbol should have been rewritten");
    assert!(code.iter().any(|w| w.as_address().is_some()));
    eval(&rt, "(setq late 4)");
    assert_eq!(eval(&rt, "(h)"), "4");
}

#[test]
fn setq_creates_globals() {
    let rt = bare();
    eval(&rt, "(setq setg (lambda () (setq fresh 7)))");
    eval(&rt, "(setg)");
    assert_eq!(eval(&rt, "fresh"), "7");
}

#[test]
fn quasiquote_builds_lists() {
    let rt = bare();
    assert_eq!(
        eval(&rt, "(let ((x 1) (y '(2 3))) `(a ,x ,@y b))"),
        "(a 1 2 3 b)"
    );
    assert_eq!(eval(&rt, "`(1 . ,(+ 1 1))"), "(1 . 2)");
    assert_eq!(eval(&rt, "`x"), "x");
}

#[test]
fn macros_expand_in_place() {
    let rt = with_prelude();
    eval(&rt, "(defmacro swap! (a b) `(let ((tmp ,a)) (setq ,a ,b) (setq ,b tmp)))");
    eval(&rt, "(setq p 1)");
    eval(&rt, "(setq q 2)");
    eval(&rt, "(swap! p q)");
    assert_eq!(eval(&rt, "(cons p q)"), "(2 . 1)");
    assert_eq!(eval(&rt, "(when (= 1 1) 'yes)"), "yes");
    assert_eq!(eval(&rt, "(unless (= 1 1) 'yes)"), "nil");
}

#[test]
fn macros_as_values_are_dispatched_at_run_time() {
    let rt = with_prelude();
    eval(&rt, "(defun pick (m) (m (+ 1 2)))");
    // A macro receives its argument unevaluated.
    eval(&rt, "(setq show (macro (form) `(quote ,form)))");
    assert_eq!(eval(&rt, "(pick show)"), "(+ 1 2)");
    assert_eq!(eval(&rt, "(pick (lambda (x) x))"), "3");
}

#[test]
fn macroexpand_loops_to_a_non_macro() {
    let rt = with_prelude();
    eval(&rt, "(defmacro my-when (c &rest body) `(if ,c (progn ,@body)))");
    eval(&rt, "(defmacro my-when2 (c &rest body) `(my-when ,c ,@body))");
    assert_eq!(
        eval(&rt, "(macroexpand '(my-when2 x 1 2))"),
        "(if x (progn 1 2))"
    );
    assert_eq!(eval(&rt, "(macroexpand '(+ 1 2))"), "(+ 1 2)");
    assert_eq!(eval(&rt, "(macroexpand 5)"), "5");
}

#[test]
fn prelude_functions() {
    let rt = with_prelude();
    assert_eq!(eval(&rt, "(length (list 1 2 3))"), "3");
    assert_eq!(eval(&rt, "(reverse '(1 2 3))"), "(3 2 1)");
    assert_eq!(eval(&rt, "(mapcar (lambda (x) (* x x)) '(1 2 3))"), "(1 4 9)");
    assert_eq!(eval(&rt, "(mapcar car '((1 2) (3 4)))"), "(1 3)");
    assert_eq!(eval(&rt, "(funcall (lambda (a b) (- a b)) 5 3)"), "2");
}

#[test]
fn meta_operations() {
    let rt = bare();
    assert_eq!(eval(&rt, "(eval '(+ 1 2))"), "3");
    assert_eq!(eval(&rt, "(exec (compile '(* 6 7)))"), "42");
    assert_eq!(eval(&rt, "(let ((x 5)) (eval '(+ x 1)))"), "6");
    assert_eq!(eval(&rt, "(read \"(a . b)\")"), "(a . b)");
    assert_eq!(eval(&rt, "(eq (intern \"foo\") 'foo)"), "t");
    assert_eq!(eval(&rt, "(symbol-name 'foo)"), "\"foo\"");
    assert_eq!(eval(&rt, "(pr-str '(1 \"a\"))"), "\"(1 \\\"a\\\")\"");
    assert_eq!(eval_err(&rt, "(exec 5)"), ErrorKind::TypeMismatch);
}

#[test]
fn type_of() {
    let rt = bare();
    for (src, name) in [
        ("1", "integer"),
        ("#\\a", "character"),
        ("nil", "null"),
        ("'(1)", "cons"),
        ("'a", "symbol"),
        ("\"s\"", "string"),
        ("(make-vector 2)", "vector"),
        ("(lambda () 1)", "closure"),
        ("(macro () 1)", "macro"),
        ("car", "builtin"),
        ("(error \"e\" nil)", "error"),
    ] {
        assert_eq!(eval(&rt, &format!("(type-of {src})")), name, "{src}");
    }
}

#[test]
fn vectors_grow() {
    let rt = bare();
    let src = "(let ((v (make-vector 1)))
                 (vpush v 1) (vpush v 2) (vpush v 3)
                 (vset v 0 10)
                 (cons (vsize v) (cons (vget v 2) (cons (vget v 0) (<= (vsize v) (vallocsize v))))))";
    assert_eq!(eval(&rt, src), "(3 3 10 . t)");
    assert_eq!(eval_err(&rt, "(vget (make-vector 3) 0)"), ErrorKind::IndexOutOfRange);
    assert_eq!(eval_err(&rt, "(vpop (make-vector 3))"), ErrorKind::EndOfSequence);
}

#[test]
fn equality() {
    let rt = bare();
    assert_eq!(eval(&rt, "(eq 'a 'a)"), "t");
    assert_eq!(eval(&rt, "(eq '(1) '(1))"), "nil");
    assert_eq!(eval(&rt, "(equal '(1 \"x\") '(1 \"x\"))"), "t");
    assert_eq!(eval(&rt, "(not (consp nil))"), "t");
}

#[test]
fn rplaca_and_append() {
    let rt = bare();
    assert_eq!(eval(&rt, "(let ((c (cons 1 2))) (rplaca c 5) c)"), "(5 . 2)");
    assert_eq!(eval(&rt, "(rplacd (cons 1 2) nil)"), "(1)");
    assert_eq!(eval(&rt, "(append '(1 2) '(3))"), "(1 2 3)");
}

#[test]
fn print_writes_to_the_runtime_output() {
    let rt = bare();
    let out = Captured::default();
    rt.set_output(Box::new(out.clone()));
    assert_eq!(eval(&rt, "(print '(1 \"two\"))"), "(1 \"two\")");
    assert_eq!(
        String::from_utf8(out.0.borrow().clone()).unwrap(),
        "(1 \"two\")\n"
    );
}

#[test]
fn princ_writes_without_quotes() {
    let rt = bare();
    let out = Captured::default();
    rt.set_output(Box::new(out.clone()));
    assert_eq!(eval(&rt, "(princ \"hi\")"), "\"hi\"");
    eval(&rt, "(princ 'there)");
    assert_eq!(String::from_utf8(out.0.borrow().clone()).unwrap(), "hithere");
}

#[test]
fn throw_and_catch() {
    let rt = with_prelude();
    assert_eq!(eval(&rt, "(catch (lambda (e) (+ e 1)) (throw 41))"), "42");
    assert_eq!(eval(&rt, "(+ 1 (catch (lambda (e) 10) (throw 'x)))"), "11");
    assert_eq!(eval(&rt, "(catch (lambda (e) 0) (+ 1 2))"), "3");
    assert_eq!(eval(&rt, "*exception-stack*"), "nil");
    assert_eq!(eval_err(&rt, "(throw 1)"), ErrorKind::Exception);
}

#[test]
fn throw_leaves_macro_forms_in_the_body() {
    let rt = with_prelude();
    let out = Captured::default();
    rt.set_output(Box::new(out.clone()));
    assert_eq!(
        eval(
            &rt,
            "(catch (lambda (e) 'caught) (when t (throw 1)) (print 'after) 'not-reached)"
        ),
        "caught"
    );
    assert!(out.0.borrow().is_empty());
    assert_eq!(eval(&rt, "*exception-stack*"), "nil");
    assert_eq!(
        eval(&rt, "(catch (lambda (e) (type-of e)) (unless nil (car 5)) 'not-reached)"),
        "error"
    );
    // Thrown while expanding.
    eval(&rt, "(defmacro explode () (throw 'boom))");
    assert_eq!(eval(&rt, "(catch (lambda (e) e) (explode) 'not-reached)"), "boom");
    assert_eq!(eval_err(&rt, "(when t (throw 1))"), ErrorKind::Exception);
}

#[test]
fn error_positions_are_source_forms() {
    let rt = with_prelude();
    assert_eq!(
        eval(&rt, "(catch (lambda (e) (car (error-positions e))) (car 5))"),
        "(car 5)"
    );
    assert_eq!(
        eval(&rt, "(catch (lambda (e) (type-of (car (error-positions e)))) (car 5))"),
        "cons"
    );
}

#[test]
fn deep_macro_recursion_is_an_error() {
    std::thread::Builder::new()
        .stack_size(256 << 20)
        .spawn(|| {
            let rt = with_prelude();
            eval(&rt, "(defun down (n) (when (> n 0) (down (- n 1))))");
            assert_eq!(eval(&rt, "(down 10)"), "nil");
            assert_eq!(eval_err(&rt, "(down 500)"), ErrorKind::TooDeep);
            // The registry unwound cleanly.
            assert_eq!(eval(&rt, "(down 10)"), "nil");
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn catch_sees_lexical_variables() {
    let rt = with_prelude();
    assert_eq!(
        eval(&rt, "(let ((x 2)) (catch (lambda (e) e) (* x 21)))"),
        "42"
    );
}

#[test]
fn runtime_errors_reach_handlers() {
    let rt = with_prelude();
    assert_eq!(
        eval(&rt, "(catch (lambda (e) (type-of e)) (car 5))"),
        "error"
    );
    let cause = eval(&rt, "(catch (lambda (e) (error-cause e)) (vget (make-vector 1) 3))");
    assert!(cause.starts_with("\"index out of range"), "{cause}");
}

#[test]
fn throw_is_a_value() {
    let rt = with_prelude();
    assert_eq!(
        eval(&rt, "(catch (lambda (e) e) (mapcar throw '(7 8)))"),
        "7"
    );
}

#[test]
fn collection_during_evaluation() {
    let rt = Runtime::new(Config::default().with_heap_words(1 << 14)).unwrap();
    eval(
        &rt,
        "(defun build (n acc) (if (= n 0) acc (build (- n 1) (cons n acc))))",
    );
    eval(
        &rt,
        "(defun churn (k total)
           (if (= k 0) total (churn (- k 1) (+ total (length (build 100 nil))))))",
    );
    assert_eq!(eval(&rt, "(churn 30 0)"), "3000");
    assert!(rt.store().current_stats().collections > 0);
    let used: usize = eval(&rt, "(gc)").parse().unwrap();
    assert!(used > 0 && used < 1 << 14);
    assert_eq!(eval(&rt, "(reverse (build 3 nil))"), "(3 2 1)");
}

#[test]
fn instructions_are_words() {
    let rt = bare();
    let unit = rt.eval_str("(compile '(+ 1 2))").unwrap();
    let code = rt.store().vector_items(rt.store().car(unit).unwrap()).unwrap();
    assert_eq!(Op::decode(code[2]), Some((Op::Add, 0)));
    assert_eq!(Op::decode(code[3]), Some((Op::Halt, 0)));
}
