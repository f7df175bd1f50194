//! What a run was asked to produce.

use cf_params::{ParamError, ParamResult, ParameterSet};

use crate::nonlinear::NonlinearMethod;

/// Parsed `output` list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputRequest {
    pub t_cl: bool,
    pub p_cl: bool,
    pub l_cl: bool,
    pub m_pk: bool,
    pub d_tk: bool,
    pub v_tk: bool,
    pub sd: bool,
}

impl OutputRequest {
    pub fn parse<S: AsRef<str>>(words: &[S]) -> ParamResult<Self> {
        let mut out = Self::default();
        for w in words {
            let w = w.as_ref();
            match w {
                "tCl" => out.t_cl = true,
                "pCl" => out.p_cl = true,
                "lCl" => out.l_cl = true,
                "mPk" => out.m_pk = true,
                "dTk" | "mTk" => out.d_tk = true,
                "vTk" => out.v_tk = true,
                "Sd" => out.sd = true,
                _ => {
                    return Err(ParamError::Malformed {
                        name: "output".to_string(),
                        value: w.to_string(),
                        expected: "tCl, pCl, lCl, mPk, dTk, vTk or Sd",
                    });
                }
            }
        }
        Ok(out)
    }

    pub fn has_cls(&self) -> bool {
        self.t_cl || self.p_cl || self.l_cl
    }

    pub fn has_transfers(&self) -> bool {
        self.d_tk || self.v_tk
    }

    pub fn needs_perturbations(&self) -> bool {
        self.has_cls() || self.m_pk || self.has_transfers()
    }
}

/// Run-level switches that decide which stages execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub output: OutputRequest,
    pub lensing: bool,
    pub non_linear: NonlinearMethod,
}

impl Request {
    pub fn from_params(params: &mut ParameterSet) -> ParamResult<Self> {
        let output = OutputRequest::parse(&params.words("output"))?;
        let lensing = params.flag_or("lensing", false)?;
        let non_linear = match params.choice_or("non_linear", &["none", "halofit", "hmcode"], "none")? {
            "halofit" => NonlinearMethod::Halofit,
            "hmcode" => NonlinearMethod::Hmcode,
            _ => NonlinearMethod::None,
        };
        Ok(Self {
            output,
            lensing,
            non_linear,
        })
    }

    pub fn wants_nonlinear(&self) -> bool {
        self.output.m_pk && self.non_linear != NonlinearMethod::None
    }

    /// Lensed spectra need a CMB spectrum to lens and the potential to lens it with.
    pub fn lensing_possible(&self) -> bool {
        (self.output.t_cl || self.output.p_cl) && self.output.l_cl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_words_parse() {
        let r = OutputRequest::parse(&["tCl", "pCl", "mPk"]).unwrap();
        assert!(r.t_cl && r.p_cl && r.m_pk && !r.l_cl);
        assert!(r.needs_perturbations());
        assert!(OutputRequest::parse(&["nCl"]).is_err());
        assert!(!OutputRequest::parse::<&str>(&[]).unwrap().needs_perturbations());
    }

    #[test]
    fn request_reads_switches() {
        let mut p = ParameterSet::from_pairs(
            "t",
            [("output", "tCl,lCl,mPk"), ("lensing", "yes"), ("non_linear", "halofit")],
        )
        .unwrap();
        let r = Request::from_params(&mut p).unwrap();
        assert!(r.lensing && r.lensing_possible() && r.wants_nonlinear());
        assert!(p.unused().is_empty());
    }
}
