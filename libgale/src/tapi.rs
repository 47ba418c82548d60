//! A decoder for the subset of the TBD text-stub format that resolution needs: the install name
//! and the exported symbol names. TBD files are YAML, but the schema is rigid enough that we
//! don't need a YAML parser - we scan for the handful of keys we care about and skip everything
//! else line by line.

use crate::error::Result;
use anyhow::Context as _;
use anyhow::anyhow;
use winnow::Parser;
use winnow::ascii::line_ending;
use winnow::ascii::multispace0;
use winnow::ascii::space0;
use winnow::ascii::till_line_ending;
use winnow::combinator::alt;
use winnow::combinator::delimited;
use winnow::combinator::opt;
use winnow::combinator::separated;
use winnow::token::take_while;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TextStub<'data> {
    pub(crate) install_name: &'data str,
    pub(crate) exports: Vec<&'data str>,
}

pub(crate) fn parse_tbd(data: &[u8]) -> Result<TextStub<'_>> {
    let text = std::str::from_utf8(data).context("TBD stub is not valid UTF-8")?;
    parse_stub
        .parse(text)
        .map_err(|error| anyhow!("Failed to parse TBD stub:\n{error}"))
}

fn parse_stub<'input>(input: &mut &'input str) -> winnow::Result<TextStub<'input>> {
    ("--- !tapi-tbd", till_line_ending, opt(line_ending)).parse_next(input)?;

    let mut stub = TextStub::default();

    loop {
        multispace0(input)?;
        // Sequence entries ("- targets: ...") are flattened: the marker is skipped and the entry
        // handled like any other keyed line.
        opt(('-', space0)).parse_next(input)?;

        if input.is_empty() || input.starts_with("...") {
            break;
        }

        if opt(("install-name:", space0)).parse_next(input)?.is_some() {
            stub.install_name = parse_scalar(input)?;
        } else if opt((alt(("symbols:", "weak-symbols:")), space0))
            .parse_next(input)?
            .is_some()
        {
            stub.exports.extend(parse_name_list(input)?);
        } else {
            // A key we don't consume. Its value never spans lines in ways that could be mistaken
            // for one of the keys above, so skipping to the next line is safe.
            (till_line_ending, opt(line_ending)).parse_next(input)?;
        }
    }

    // Consume the document-end marker and whatever trails it.
    take_while(0.., |_: char| true).void().parse_next(input)?;

    Ok(stub)
}

fn parse_scalar<'input>(input: &mut &'input str) -> winnow::Result<&'input str> {
    alt((
        delimited('\'', take_while(0.., |c| c != '\''), '\''),
        delimited('"', take_while(0.., |c| c != '"'), '"'),
        till_line_ending.map(str::trim_end),
    ))
    .parse_next(input)
}

fn parse_name_list<'input>(input: &mut &'input str) -> winnow::Result<Vec<&'input str>> {
    '['.parse_next(input)?;
    let names: Vec<&str> = separated(0.., parse_name, ',').parse_next(input)?;
    (multispace0, ']').parse_next(input)?;
    Ok(names)
}

fn parse_name<'input>(input: &mut &'input str) -> winnow::Result<&'input str> {
    multispace0(input)?;
    alt((
        delimited('\'', take_while(0.., |c| c != '\''), '\''),
        delimited('"', take_while(0.., |c| c != '"'), '"'),
        take_while(1.., |c: char| {
            !c.is_whitespace() && c != ',' && c != ']'
        }),
    ))
    .parse_next(input)
}
