// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Login-parameter copy (§4.6): a pure mapping from a recognized parameter
//! id to the value carried in a [`LoginParamValues`] record.

use crate::discovery::{
    error::ParamCopyError,
    types::{LoginParamValues, ParamSetValue},
};

/// The eleven login-parameter ids the discovery core knows how to push
/// through `HbaOps::set_login_param`. Anything else — including
/// `MaxConnections`, `OutstandingR2T`, `ErrorRecoveryLevel` — is not
/// settable via this path and yields [`ParamCopyError::Invalid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParamId {
    DataSequenceInOrder = 0,
    ImmediateData = 1,
    InitialR2T = 2,
    DataPduInOrder = 3,
    HeaderDigest = 4,
    DataDigest = 5,
    DefaultTime2Retain = 6,
    DefaultTime2Wait = 7,
    MaxRecvDataSegmentLength = 8,
    FirstBurstLength = 9,
    MaxBurstLength = 10,
}

impl ParamId {
    fn from_u32(id: u32) -> Option<Self> {
        Some(match id {
            0 => ParamId::DataSequenceInOrder,
            1 => ParamId::ImmediateData,
            2 => ParamId::InitialR2T,
            3 => ParamId::DataPduInOrder,
            4 => ParamId::HeaderDigest,
            5 => ParamId::DataDigest,
            6 => ParamId::DefaultTime2Retain,
            7 => ParamId::DefaultTime2Wait,
            8 => ParamId::MaxRecvDataSegmentLength,
            9 => ParamId::FirstBurstLength,
            10 => ParamId::MaxBurstLength,
            _ => return None,
        })
    }
}

/// Copy the value named by `param_id` out of `values`. Pure and
/// side-effect free: pushing the result to the downstream login engine is
/// the caller's job (`bootstrap::push_overrides`).
pub fn param_copy(
    param_id: u32,
    values: &LoginParamValues,
) -> Result<ParamSetValue, ParamCopyError> {
    let id = ParamId::from_u32(param_id).ok_or(ParamCopyError::Invalid(param_id))?;
    Ok(match id {
        // Inherited quirk, preserved verbatim: the original reads
        // `data_pdu_in_order` for both ids (a copy-paste artifact in
        // iscsid.c's `iscsid_copyto_param_set`), so there is no separate
        // "data sequence in order" field to read here either.
        ParamId::DataSequenceInOrder => ParamSetValue::Bool(values.data_pdu_in_order),
        ParamId::ImmediateData => ParamSetValue::Bool(values.immediate_data),
        ParamId::InitialR2T => ParamSetValue::Bool(values.initial_r2t),
        ParamId::DataPduInOrder => ParamSetValue::Bool(values.data_pdu_in_order),
        ParamId::HeaderDigest => ParamSetValue::Integer(values.header_digest),
        ParamId::DataDigest => ParamSetValue::Integer(values.data_digest),
        ParamId::DefaultTime2Retain => ParamSetValue::Integer(values.default_time_to_retain),
        ParamId::DefaultTime2Wait => ParamSetValue::Integer(values.default_time_to_wait),
        ParamId::MaxRecvDataSegmentLength => {
            ParamSetValue::Integer(values.max_recv_data_seg_len)
        },
        ParamId::FirstBurstLength => ParamSetValue::Integer(values.first_burst_length),
        ParamId::MaxBurstLength => ParamSetValue::Integer(values.max_burst_length),
    })
}
