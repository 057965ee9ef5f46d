//! Canon adapters: the functions synthesised by `canon lift`, `canon lower`
//! and the resource builtins.
//!
//! A lower adapter wraps a component function as a core function: invoked
//! from core wasm, it lifts the flat parameters, calls the component
//! function, and lowers the result back into the caller's representation. A
//! lift adapter is the mirror image around a core function, bracketed by the
//! owning instance's enter/exit discipline. The resource builtins are
//! single-purpose core functions bound to a local resource type.

use log::trace;

use crate::ast::CanonOpt;
use crate::canonical_abi::{
    self, flatten_signature, load_values, options, store_values, AdapterDirection, CanonOpts,
    FlatReader, FlatSignature, LiftLowerCx,
};
use crate::context::Context;
use crate::definitions::InstanceScope;
use crate::engine::{CoreExtern, CoreFunc};
use crate::instance::ComponentFunc;
use crate::prelude::*;
use crate::resources::{Handle, HandleRep, OwnedHandle};
use crate::types::{FuncType, ResourceType, Type, ValType};
use crate::values::Value;

/// Signature of `resource.new`: `(i32 rep) -> i32 handle`
pub fn resource_new_signature() -> CoreFuncType {
    CoreFuncType::new(&[CoreValType::I32], &[CoreValType::I32])
}

/// Signature of `resource.drop`: `(i32 handle) -> ()`
pub fn resource_drop_signature() -> CoreFuncType {
    CoreFuncType::new(&[CoreValType::I32], &[])
}

/// Signature of `resource.rep`: `(i32 handle) -> i32 rep`
pub fn resource_rep_signature() -> CoreFuncType {
    CoreFuncType::new(&[CoreValType::I32], &[CoreValType::I32])
}

fn resolve_opts(
    cx: &Context,
    scope: &Rc<InstanceScope>,
    opts: &[CanonOpt],
    direction: AdapterDirection,
) -> Result<CanonOpts> {
    options::validate_opt_decls(opts, direction)?;
    let mut out = CanonOpts {
        encoding: options::selected_encoding(opts),
        ..CanonOpts::default()
    };
    for opt in opts {
        match opt {
            CanonOpt::Memory(idx) => match scope.resolve_core_memory(cx, *idx)? {
                CoreExtern::Memory(memory) => out.memory = Some(memory),
                other => {
                    return Err(Error::type_mismatch(format!(
                        "memory option names a {}",
                        other.kind()
                    )));
                }
            },
            CanonOpt::Realloc(idx) => {
                let func = scope.resolve_core_func(cx, *idx)?;
                options::check_realloc_signature(func.func_type())?;
                out.realloc = Some(func);
            }
            CanonOpt::PostReturn(idx) => {
                out.post_return = Some(scope.resolve_core_func(cx, *idx)?);
            }
            CanonOpt::StringUtf8 | CanonOpt::StringUtf16 | CanonOpt::StringLatin1Utf16 => {}
        }
    }
    Ok(out)
}

fn check_requirements(
    opts: &CanonOpts,
    ty: &FuncType,
    sig: &FlatSignature,
    direction: AdapterDirection,
) -> Result<()> {
    let params_need_memory = ty.params.iter().any(|(_, t)| options::needs_memory(t));
    let results_need_memory = ty.results.iter().any(options::needs_memory);
    let memory_needed =
        params_need_memory || results_need_memory || !sig.params_flat || !sig.results_flat;
    if memory_needed && opts.memory.is_none() {
        return Err(Error::abi_option_required(
            "adapter needs the `memory` option",
        ));
    }
    let realloc_needed = match direction {
        AdapterDirection::Lower => ty.params.iter().any(|(_, t)| options::needs_realloc(t)),
        AdapterDirection::Lift => {
            ty.results.iter().any(options::needs_realloc)
                || !sig.params_flat
                || !sig.results_flat
        }
    };
    if realloc_needed && opts.realloc.is_none() {
        return Err(Error::abi_option_required(
            "adapter needs the `realloc` option",
        ));
    }
    Ok(())
}

/// Build the core function for a `canon lower` definition
pub fn lower_func(
    cx: &Context,
    scope: &Rc<InstanceScope>,
    func_idx: u32,
    opts: &[CanonOpt],
) -> Result<CoreFunc> {
    let func = scope.resolve_func(cx, func_idx)?;
    let ty = func.func_type().clone();
    let sig = flatten_signature(&ty);
    let canon_opts = resolve_opts(cx, scope, opts, AdapterDirection::Lower)?;
    check_requirements(&canon_opts, &ty, &sig, AdapterDirection::Lower)?;

    let instance = scope.current().clone();
    let core_ty = sig.core_type();
    let param_types: Vec<ValType> = ty.params.iter().map(|(_, t)| t.clone()).collect();
    let result_types: Vec<ValType> = ty.results.clone();
    let call_cx = cx.clone();

    let body = move |args: &[CoreValue]| -> Result<Vec<CoreValue>> {
        trace!("canon lower: entering component function");
        call_cx.check_cancelled()?;
        instance.check_leave()?;
        let mut llcx = LiftLowerCx::new(&canon_opts, instance.clone());

        let values = if sig.params_flat {
            let mut reader = FlatReader::new(args);
            let mut values = Vec::with_capacity(param_types.len());
            for ty in &param_types {
                values.push(ty.lift_flat(&mut llcx, &mut reader)?);
            }
            values
        } else {
            let ptr = args
                .first()
                .ok_or_else(|| Error::validation_error("missing parameter pointer"))?
                .as_u32()?;
            load_values(&mut llcx, &param_types, ptr)?
        };

        let results = func.call(values)?;
        if results.len() != result_types.len() {
            return Err(Error::function_call_failed(format!(
                "component function returned {} values, expected {}",
                results.len(),
                result_types.len()
            )));
        }

        let out = if sig.results_flat {
            let mut out = Vec::new();
            instance.with_leave_forbidden(|| {
                for (ty, value) in result_types.iter().zip(results.iter()) {
                    ty.lower_flat(&mut llcx, value, &mut out)?;
                }
                Ok(())
            })?;
            out
        } else {
            let retptr = args
                .last()
                .ok_or_else(|| Error::validation_error("missing return pointer"))?
                .as_u32()?;
            instance.with_leave_forbidden(|| {
                store_values(&mut llcx, &result_types, retptr, &results)
            })?;
            Vec::new()
        };
        llcx.release_lent()?;
        Ok(out)
    };
    Ok(CoreFunc::new(core_ty, body))
}

/// Build the component function for a `canon lift` definition
pub fn lift_func(
    cx: &Context,
    scope: &Rc<InstanceScope>,
    core_func_idx: u32,
    type_idx: u32,
    opts: &[CanonOpt],
) -> Result<ComponentFunc> {
    let core_func = scope.resolve_core_func(cx, core_func_idx)?;
    let ty = match scope.resolve_type(cx, type_idx)? {
        Type::Func(ty) => ty,
        other => {
            return Err(Error::type_mismatch(format!(
                "canon lift needs a function type, got {}",
                other.type_name()
            )));
        }
    };
    let sig = flatten_signature(&ty);
    if *core_func.func_type() != sig.core_type() {
        return Err(Error::type_mismatch(format!(
            "lifted core function has signature {}, expected {}",
            core_func.func_type(),
            sig.core_type()
        )));
    }
    let canon_opts = resolve_opts(cx, scope, opts, AdapterDirection::Lift)?;
    if let Some(post_return) = &canon_opts.post_return {
        options::check_post_return_signature(post_return.func_type(), &sig.results)?;
    }
    check_requirements(&canon_opts, &ty, &sig, AdapterDirection::Lift)?;

    let instance = scope.current().clone();
    let param_types: Vec<ValType> = ty.params.iter().map(|(_, t)| t.clone()).collect();
    let result_types: Vec<ValType> = ty.results.clone();
    let call_cx = cx.clone();
    let func_ty = ty.clone();

    let body = move |args: Vec<Value>| -> Result<Vec<Value>> {
        trace!("canon lift: entering core function");
        call_cx.check_cancelled()?;
        instance.enter()?;
        let outcome = (|| {
            let mut llcx = LiftLowerCx::new(&canon_opts, instance.clone());

            let mut core_args: Vec<CoreValue> = Vec::new();
            let mut retptr: Option<u32> = None;
            instance.with_leave_forbidden(|| {
                if sig.params_flat {
                    for (ty, value) in param_types.iter().zip(args.iter()) {
                        ty.lower_flat(&mut llcx, value, &mut core_args)?;
                    }
                } else {
                    let layout = canonical_abi::layout::values_layout(&param_types);
                    let ptr = llcx.alloc(layout.size, layout.alignment)?;
                    store_values(&mut llcx, &param_types, ptr, &args)?;
                    core_args.push(CoreValue::I32(ptr as i32));
                }
                if !sig.results_flat {
                    let layout = canonical_abi::layout::values_layout(&result_types);
                    let ptr = llcx.alloc(layout.size, layout.alignment)?;
                    core_args.push(CoreValue::I32(ptr as i32));
                    retptr = Some(ptr);
                }
                Ok(())
            })?;

            let core_results = core_func.call(&core_args)?;
            // Post-return receives the original result words, untouched by
            // lifting
            let snapshot = core_results.clone();

            let results = match retptr {
                None => {
                    let mut reader = FlatReader::new(&core_results);
                    let mut results = Vec::with_capacity(result_types.len());
                    for ty in &result_types {
                        results.push(ty.lift_flat(&mut llcx, &mut reader)?);
                    }
                    results
                }
                Some(ptr) => load_values(&mut llcx, &result_types, ptr)?,
            };

            if let Some(post_return) = &canon_opts.post_return {
                post_return.call(&snapshot)?;
            }
            llcx.release_lent()?;
            Ok(results)
        })();
        let exited = instance.exit();
        let results = outcome?;
        exited?;
        Ok(results)
    };
    Ok(ComponentFunc::new(func_ty, body))
}

fn expect_resource(ty: Type) -> Result<Rc<ResourceType>> {
    match ty {
        Type::Resource(resource) => Ok(resource),
        other => Err(Error::type_mismatch(format!(
            "expected a resource type, got {}",
            other.type_name()
        ))),
    }
}

fn require_local(
    resource: &Rc<ResourceType>,
    scope: &Rc<InstanceScope>,
    what: &str,
) -> Result<()> {
    let local = resource
        .owner()
        .is_some_and(|owner| Rc::ptr_eq(&owner, scope.current()));
    if local {
        Ok(())
    } else {
        Err(Error::resource_not_local(format!(
            "{what} requires a resource type of the current component"
        )))
    }
}

/// Build the `resource.new` core function
pub fn resource_new_func(
    cx: &Context,
    scope: &Rc<InstanceScope>,
    type_idx: u32,
) -> Result<CoreFunc> {
    let resource = expect_resource(scope.resolve_type(cx, type_idx)?)?;
    require_local(&resource, scope, "resource.new")?;
    let instance = scope.current().clone();
    Ok(CoreFunc::new(resource_new_signature(), move |args| {
        let rep = args[0].as_u32()?;
        let own = OwnedHandle::new(resource.clone(), HandleRep::U32(rep))?;
        let idx = instance.lower_handle(Handle::Own(own))?;
        trace!("resource.new: handle {idx} for rep {rep}");
        Ok(vec![CoreValue::I32(idx as i32)])
    }))
}

/// Build the `resource.drop` core function
pub fn resource_drop_func(
    cx: &Context,
    scope: &Rc<InstanceScope>,
    type_idx: u32,
) -> Result<CoreFunc> {
    let resource = expect_resource(scope.resolve_type(cx, type_idx)?)?;
    let instance = scope.current().clone();
    Ok(CoreFunc::new(resource_drop_signature(), move |args| {
        let idx = args[0].as_u32()?;
        // Refuse while lends are outstanding before removing the table entry
        let handle = instance.read_handle(idx, &resource)?;
        if let Handle::Own(own) = &handle {
            if own.num_lends() > 0 {
                return Err(Error::handle_misuse(format!(
                    "cannot drop handle {idx} with {} outstanding lends",
                    own.num_lends()
                )));
            }
        }
        let handle = instance.take_handle(idx, &resource)?;
        handle.drop_handle()?;
        trace!("resource.drop: handle {idx} dropped");
        Ok(Vec::new())
    }))
}

/// Build the `resource.rep` core function
pub fn resource_rep_func(
    cx: &Context,
    scope: &Rc<InstanceScope>,
    type_idx: u32,
) -> Result<CoreFunc> {
    let resource = expect_resource(scope.resolve_type(cx, type_idx)?)?;
    require_local(&resource, scope, "resource.rep")?;
    let instance = scope.current().clone();
    Ok(CoreFunc::new(resource_rep_signature(), move |args| {
        let idx = args[0].as_u32()?;
        let handle = instance.read_handle(idx, &resource)?;
        let rep = handle.resource()?.as_u32()?;
        Ok(vec![CoreValue::I32(rep as i32)])
    }))
}
