//! Build-time validation: name rules, option sets, index ranges, budgets.

mod common;

use common::MockEngine;
use wcr_component::ast::{
    AliasDecl, AliasTarget, CanonDecl, CanonOpt, ComponentAst, Decl, DefValTypeExpr,
    ExportDecl, ExternDesc, FuncTypeExpr, ImportDecl, PrimValType, TypeBound, TypeExpr,
    ValTypeRef,
};
use wcr_component::definitions::Sort;
use wcr_component::{build, Context};
use wcr_error::codes;

fn cx() -> Context {
    Context::new(MockEngine::new())
}

fn func_type_decl() -> Decl {
    Decl::Type(TypeExpr::Func(FuncTypeExpr {
        params: vec![("v".to_string(), ValTypeRef::Prim(PrimValType::U32))],
        results: vec![],
    }))
}

fn import(name: &str, desc: ExternDesc) -> Decl {
    Decl::Import(ImportDecl { name: name.to_string(), desc })
}

#[test]
fn import_names_must_be_strongly_unique() {
    let ast = ComponentAst {
        name: None,
        decls: vec![
            func_type_decl(),
            import("frob", ExternDesc::Func(0)),
            import("frob", ExternDesc::Func(0)),
        ],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::DUPLICATE_NAME);

    // Case-folded collisions are rejected too
    let ast = ComponentAst {
        name: None,
        decls: vec![
            func_type_decl(),
            import("Frob", ExternDesc::Func(0)),
            import("frob", ExternDesc::Func(0)),
        ],
    };
    assert!(build(&cx(), &ast).is_err());
}

#[test]
fn constructor_names_do_not_collide_with_plain_names() {
    let ast = ComponentAst {
        name: None,
        decls: vec![
            func_type_decl(),
            import("point", ExternDesc::Func(0)),
            import("[constructor]point", ExternDesc::Func(0)),
        ],
    };
    assert!(build(&cx(), &ast).is_ok());

    // Method names collide with their bare final segment
    let ast = ComponentAst {
        name: None,
        decls: vec![
            func_type_decl(),
            import("x", ExternDesc::Func(0)),
            import("[method]point.x", ExternDesc::Func(0)),
        ],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::DUPLICATE_NAME);
}

#[test]
fn canon_option_conflicts_fail_the_build() {
    let base = vec![
        func_type_decl(),
        import("f", ExternDesc::Func(0)),
    ];

    let mut decls = base.clone();
    decls.push(Decl::Canon(CanonDecl::Lower {
        func_idx: 0,
        opts: vec![CanonOpt::StringUtf8, CanonOpt::StringUtf16],
    }));
    let err = build(&cx(), &ComponentAst { name: None, decls }).unwrap_err();
    assert_eq!(err.code, codes::ABI_OPTION_CONFLICT);

    let mut decls = base.clone();
    decls.push(Decl::Canon(CanonDecl::Lower {
        func_idx: 0,
        opts: vec![CanonOpt::PostReturn(0)],
    }));
    let err = build(&cx(), &ComponentAst { name: None, decls }).unwrap_err();
    assert_eq!(err.code, codes::ABI_OPTION_UNEXPECTED);

    let mut decls = base;
    decls.push(Decl::Canon(CanonDecl::Lower {
        func_idx: 0,
        opts: vec![CanonOpt::Memory(0), CanonOpt::Memory(0)],
    }));
    let err = build(&cx(), &ComponentAst { name: None, decls }).unwrap_err();
    assert_eq!(err.code, codes::ABI_OPTION_CONFLICT);
}

#[test]
fn alias_indices_are_range_checked() {
    let ast = ComponentAst {
        name: None,
        decls: vec![Decl::Alias(AliasDecl {
            sort: Sort::Func,
            target: AliasTarget::InstanceExport {
                instance_idx: 0,
                name: "f".to_string(),
            },
        })],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::INDEX_OUT_OF_RANGE);

    let ast = ComponentAst {
        name: None,
        decls: vec![Decl::Alias(AliasDecl {
            sort: Sort::Type,
            target: AliasTarget::Outer { count: 3, idx: 0 },
        })],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::SCOPE_DEPTH_EXCEEDED);
}

#[test]
fn export_indices_are_range_checked() {
    let ast = ComponentAst {
        name: None,
        decls: vec![Decl::Export(ExportDecl {
            name: "missing".to_string(),
            sort: Sort::Func,
            idx: 0,
            desc: None,
        })],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::INDEX_OUT_OF_RANGE);
}

#[test]
fn type_depth_budget_fails_the_build() {
    // type 0 is list<u32>; each following type wraps the previous one
    let mut decls = vec![Decl::Type(TypeExpr::Defined(DefValTypeExpr::List(
        ValTypeRef::Prim(PrimValType::U32),
    )))];
    for i in 0..110u32 {
        decls.push(Decl::Type(TypeExpr::Defined(DefValTypeExpr::List(
            ValTypeRef::Idx(i),
        ))));
    }
    let err = build(&cx(), &ComponentAst { name: None, decls }).unwrap_err();
    assert_eq!(err.code, codes::TYPE_DEPTH_EXCEEDED);
}

#[test]
fn duplicate_record_fields_fail_the_build() {
    let ast = ComponentAst {
        name: None,
        decls: vec![Decl::Type(TypeExpr::Defined(DefValTypeExpr::Record(vec![
            ("x".to_string(), ValTypeRef::Prim(PrimValType::U32)),
            ("x".to_string(), ValTypeRef::Prim(PrimValType::U32)),
        ])))],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::DUPLICATE_NAME);
}

#[test]
fn resource_builtins_require_a_resource_type() {
    let ast = ComponentAst {
        name: None,
        decls: vec![
            Decl::Type(TypeExpr::Defined(DefValTypeExpr::Prim(PrimValType::U32))),
            Decl::Canon(CanonDecl::ResourceNew { type_idx: 0 }),
        ],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::TYPE_MISMATCH);
}

#[test]
fn outer_alias_of_plain_types_is_allowed() {
    let nested = ComponentAst {
        name: None,
        decls: vec![
            Decl::Alias(AliasDecl {
                sort: Sort::Type,
                target: AliasTarget::Outer { count: 1, idx: 0 },
            }),
            Decl::Export(ExportDecl {
                name: "t".to_string(),
                sort: Sort::Type,
                idx: 0,
                desc: None,
            }),
        ],
    };
    let ast = ComponentAst {
        name: None,
        decls: vec![
            Decl::Type(TypeExpr::Defined(DefValTypeExpr::Record(vec![(
                "x".to_string(),
                ValTypeRef::Prim(PrimValType::U32),
            )]))),
            Decl::Component(Box::new(nested)),
        ],
    };
    assert!(build(&cx(), &ast).is_ok());
}

#[test]
fn type_imports_validate_their_bound_index() {
    let ast = ComponentAst {
        name: None,
        decls: vec![import("t", ExternDesc::Type(TypeBound::Eq(5)))],
    };
    let err = build(&cx(), &ast).unwrap_err();
    assert_eq!(err.code, codes::INDEX_OUT_OF_RANGE);

    let ast = ComponentAst {
        name: None,
        decls: vec![import("r", ExternDesc::Type(TypeBound::SubResource))],
    };
    assert!(build(&cx(), &ast).is_ok());
}
