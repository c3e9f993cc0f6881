//! Generates the script that surrounds a factor snippet.
//!
//! The snippet never becomes part of the script source. It is embedded as a
//! string literal and run with `exec` inside a namespace that already holds
//! the data readers, so its line numbers in tracebacks match what the author
//! wrote and it cannot break the surrounding `try` block with bad indentation.

use factorlab_core::{Fixture, Result};

use crate::protocol::{ERROR_END, ERROR_START, RESULT_END, RESULT_START};

/// Name every snippet must define; baked into all prompts as well.
pub const ENTRY_POINT: &str = "calculate_factor";

/// Filename reported in tracebacks for lines that belong to the snippet.
pub const SNIPPET_FILENAME: &str = "<factor>";

/// Knobs that vary per deployment.
#[derive(Debug, Clone)]
pub struct WrapOptions {
    pub timeout_secs: u64,
    pub data_root: String,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            data_root: "/ssd_data/stock".to_string(),
        }
    }
}

pub fn timeout_message(timeout_secs: u64) -> String {
    format!("代码执行超时（{}秒）", timeout_secs)
}

const TEMPLATE: &str = r#"import sys
import json
import math
import signal
import traceback

_TIMEOUT_SECS = __FL_TIMEOUT_SECS__
_TIMEOUT_MSG = __FL_TIMEOUT_MSG__


def _on_alarm(signum, frame):
    raise TimeoutError(_TIMEOUT_MSG)


if hasattr(signal, "SIGALRM"):
    signal.signal(signal.SIGALRM, _on_alarm)
    signal.alarm(_TIMEOUT_SECS)


def _cancel_alarm():
    if hasattr(signal, "SIGALRM"):
        signal.alarm(0)


try:
    import os
    import numpy as np
    import pandas as pd

    _DATA_ROOT = __FL_DATA_ROOT__

    def read_trade(symbol, date, with_retreat=0):
        file_name = "%s_%d_%s.csv" % (symbol, date, "transaction")
        file_path = os.path.join(_DATA_ROOT, str(date), "transaction", file_name)
        df = pd.read_csv(
            file_path,
            dtype={"symbol": str},
            usecols=["exchtime", "price", "volume", "turnover", "flag", "index", "localtime", "ask_order", "bid_order"],
            memory_map=True,
            engine="c",
            low_memory=False,
        )
        if not with_retreat:
            df = df[df.flag != 32]
        df.exchtime = pd.to_timedelta(df.exchtime / 1e6, unit="s") + pd.Timestamp("1970-01-01 08:00:00")
        return df

    def read_market(symbol, date):
        file_name = "%s_%d_%s.csv" % (symbol, date, "market_data")
        file_path = os.path.join(_DATA_ROOT, str(date), "market_data", file_name)
        df = pd.read_csv(
            file_path,
            dtype={"symbol": str},
            memory_map=True,
            engine="c",
            low_memory=False,
        )
        df.exchtime = pd.to_timedelta(df.exchtime / 1e6, unit="s") + pd.Timestamp("1970-01-01 08:00:00")
        return df

    def _book_side(df, side):
        prc_cols = ["%s_prc%d" % (side, i) for i in range(1, 11)]
        vol_cols = ["%s_vol%d" % (side, i) for i in range(1, 11)]
        prices = (
            pd.melt(df[prc_cols + ["exchtime"]], id_vars=["exchtime"], value_name="price")
            .rename(columns={"variable": "number"})
            .set_index("exchtime")
        )
        vols = (
            pd.melt(df[vol_cols + ["exchtime"]], id_vars=["exchtime"], value_name="vol")
            .drop(columns=["variable"])
            .set_index("exchtime")
        )
        book = pd.concat([prices, vols], axis=1)
        book = book[book.price != 0]
        book.number = book.number.str.slice(7).astype(int)
        return book.reset_index().sort_values(by=["exchtime", "number"]).reset_index(drop=True)

    def read_market_pair(symbol, date):
        df = read_market(symbol, date)
        df = df[df.last_prc != 0]
        return _book_side(df, "ask"), _book_side(df, "bid")

    _READERS = {
        "read_trade": read_trade,
        "read_market": read_market,
        "read_market_pair": read_market_pair,
    }

    def _num(v):
        if v is None or isinstance(v, str):
            return None
        try:
            f = float(v)
        except (TypeError, ValueError):
            return None
        return f if math.isfinite(f) else None

    def _stats(values, ddof):
        present = np.array([v for v in values if v is not None], dtype=float)
        n = int(present.size)
        if n == 0:
            return {"mean": None, "std": None, "min": None, "max": None, "count": 0}
        return {
            "mean": _num(np.mean(present)),
            "std": _num(np.std(present, ddof=ddof)) if n > ddof else None,
            "min": _num(np.min(present)),
            "max": _num(np.max(present)),
            "count": n,
        }

    def _dict_entry(v):
        if v is None:
            return None
        if isinstance(v, (bool, int, float, np.number, np.bool_)):
            return _num(v)
        if isinstance(v, str):
            return v
        return str(v)

    def _classify(value):
        if isinstance(value, pd.DataFrame):
            return None
        if isinstance(value, pd.Series):
            y = [_num(v) for v in value.tolist()]
            return {
                "type": "Series",
                "stats": _stats(y, 1),
                "data": {"x": value.index.astype(str).tolist(), "y": y},
            }
        if isinstance(value, dict):
            return {"type": "Dict", "value": {str(k): _dict_entry(v) for k, v in value.items()}}
        if isinstance(value, (bool, int, float, np.number, np.bool_)):
            return {"type": "Scalar", "value": _num(value)}
        if isinstance(value, (np.ndarray, list, tuple)):
            flat = np.asarray(value, dtype=object).ravel().tolist()
            data = [_num(v) for v in flat]
            return {"type": "Array", "stats": _stats(data, 0), "data": data}
        return None

    def _classify_all(mapping):
        out = {}
        if not isinstance(mapping, dict):
            return out
        for name, value in mapping.items():
            shaped = _classify(value)
            if shaped is not None:
                out[str(name)] = shaped
        return out

    def _plot_for(factors):
        if not factors:
            return None
        name, first = next(iter(factors.items()))
        if first["type"] == "Series":
            return {
                "data": [{
                    "x": first["data"]["x"],
                    "y": first["data"]["y"],
                    "type": "scatter",
                    "mode": "lines",
                    "name": name,
                }],
                "layout": {
                    "title": "因子: %s" % name,
                    "xaxis": {"title": "时间"},
                    "yaxis": {"title": "值"},
                },
            }
        if first["type"] == "Scalar":
            return {
                "data": [{
                    "type": "indicator",
                    "mode": "number",
                    "value": first["value"],
                    "title": {"text": "因子: %s" % name},
                }],
                "layout": {"height": 300},
            }
        return None

    _ns = {"__name__": "__factor__", "pd": pd, "np": np, "os": os}
    _ns.update(_READERS)
    exec(compile(__FL_SNIPPET__, "__FL_SNIPPET_FILENAME__", "exec"), _ns)
    _ns.update(_READERS)

    _entry = _ns.get("__FL_ENTRY_POINT__")
    if not callable(_entry):
        raise NameError("snippet does not define __FL_ENTRY_POINT__(code, date)")

    _result = _entry(__FL_FIXTURE_CODE__, __FL_FIXTURE_DATE__)

    if isinstance(_result, tuple) and len(_result) == 2:
        _factor_dict, _key_dict = _result
        if not isinstance(_factor_dict, dict):
            _factor_dict = {"result": _factor_dict}
    elif isinstance(_result, dict):
        _factor_dict, _key_dict = _result, {}
    else:
        _factor_dict, _key_dict = {"result": _result}, {}

    _factors = _classify_all(_factor_dict)
    _output = {
        "factors": _factors,
        "keyVariables": _classify_all(_key_dict),
        "plotlyData": _plot_for(_factors),
        "finalResult": None,
    }
    _payload = json.dumps(_output, default=str, allow_nan=False, ensure_ascii=False)
    _cancel_alarm()
    sys.stdout.flush()
    print("__FL_RESULT_START__")
    print(_payload)
    print("__FL_RESULT_END__")
    sys.stdout.flush()

except TimeoutError:
    _cancel_alarm()
    print("__FL_ERROR_START__")
    print(json.dumps({"error": _TIMEOUT_MSG, "type": "TimeoutError"}, ensure_ascii=False))
    print("__FL_ERROR_END__")
    sys.stdout.flush()
    sys.exit(1)
except Exception as e:
    _cancel_alarm()
    print("__FL_ERROR_START__")
    print(json.dumps({"error": str(e), "type": type(e).__name__, "traceback": traceback.format_exc()}, ensure_ascii=False, default=str))
    print("__FL_ERROR_END__")
    sys.stdout.flush()
    sys.exit(1)
"#;

/// Python literal for `s`. JSON string syntax is a subset of Python's.
fn py_str(s: &str) -> Result<String> {
    Ok(serde_json::to_string(s)?)
}

/// Build the full script for `code` evaluated at `fixture`.
pub fn wrap_snippet(code: &str, fixture: &Fixture, opts: &WrapOptions) -> Result<String> {
    // The snippet goes in last so placeholder-looking text inside it is left alone.
    let script = TEMPLATE
        .replace("__FL_TIMEOUT_SECS__", &opts.timeout_secs.to_string())
        .replace("__FL_TIMEOUT_MSG__", &py_str(&timeout_message(opts.timeout_secs))?)
        .replace("__FL_DATA_ROOT__", &py_str(&opts.data_root)?)
        .replace("__FL_SNIPPET_FILENAME__", SNIPPET_FILENAME)
        .replace("__FL_ENTRY_POINT__", ENTRY_POINT)
        .replace("__FL_FIXTURE_CODE__", &py_str(&fixture.code)?)
        .replace("__FL_FIXTURE_DATE__", &fixture.date.to_string())
        .replace("__FL_RESULT_START__", RESULT_START)
        .replace("__FL_RESULT_END__", RESULT_END)
        .replace("__FL_ERROR_START__", ERROR_START)
        .replace("__FL_ERROR_END__", ERROR_END)
        .replace("__FL_SNIPPET__", &py_str(code)?);
    Ok(script)
}
